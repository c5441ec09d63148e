// Staging area for worker-produced result files.
//
// Workers stream batches back over the transport; the frontend deposits the
// reassembled file here under its pull URL, and the merging handler consumes
// it exactly once.

use dashmap::DashMap;

use crate::global::{AttemptId, JobId, QueryId};
use crate::rowstore::Row;

/// One reassembled result file for a `(job, attempt)`.
#[derive(Debug, Clone, Default)]
pub struct ResultFile {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Default)]
pub struct ResultFileStore {
    files: DashMap<String, ResultFile>,
}

impl ResultFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pull URL for one job attempt's result file.
    pub fn url_for(query_id: QueryId, job_id: JobId, attempt: AttemptId) -> String {
        format!("mem:/{query_id}/{job_id}/{attempt}")
    }

    /// Recover `(query_id, job_id, attempt)` from a pull URL.
    pub fn parse_url(url: &str) -> Option<(QueryId, JobId, AttemptId)> {
        let rest = url.strip_prefix("mem:/")?;
        let mut parts = rest.split('/');
        let query_id = parts.next()?.parse().ok()?;
        let job_id = parts.next()?.parse().ok()?;
        let attempt = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((query_id, job_id, attempt))
    }

    pub fn insert(&self, url: &str, file: ResultFile) {
        self.files.insert(url.to_string(), file);
    }

    /// Consume a file. Single use: a second take of the same URL is `None`.
    pub fn take(&self, url: &str) -> Option<ResultFile> {
        self.files.remove(url).map(|(_, f)| f)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
