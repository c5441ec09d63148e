// The per-query result table.
//
// Partial rows arrive tagged with their `(job_id, attempt)` so a superseded
// attempt can be scrubbed without touching anything else. Row order within
// one job is arrival order, which is production order on the worker; order
// across jobs is undefined until the merge step applies an ORDER BY.

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::global::{AttemptId, JobId};
use crate::rowstore::Row;

struct TaggedRow {
    job_id: JobId,
    attempt: AttemptId,
    row: Row,
}

pub struct ResultTable {
    name: String,
    columns: Mutex<Vec<String>>,
    rows: Mutex<Vec<TaggedRow>>,
}

impl ResultTable {
    pub fn new(name: &str) -> Self {
        ResultTable {
            name: name.to_string(),
            columns: Mutex::new(Vec::new()),
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adopt the schema from the first merged file; later files must match.
    pub fn adopt_columns(&self, columns: &[String]) -> Result<()> {
        let mut current = self.columns.lock();
        if current.is_empty() {
            *current = columns.to_vec();
            return Ok(());
        }
        if *current != columns {
            return Err(Error::Merge(format!(
                "result schema mismatch: table has {:?}, file has {:?}",
                *current, columns
            )));
        }
        Ok(())
    }

    pub fn columns(&self) -> Vec<String> {
        self.columns.lock().clone()
    }

    pub fn append_batch(&self, job_id: JobId, attempt: AttemptId, batch: Vec<Row>) {
        let mut rows = self.rows.lock();
        rows.extend(batch.into_iter().map(|row| TaggedRow {
            job_id,
            attempt,
            row,
        }));
    }

    /// Remove every row of one `(job_id, attempt)`. Returns how many went.
    pub fn scrub(&self, job_id: JobId, attempt: AttemptId) -> usize {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|t| !(t.job_id == job_id && t.attempt == attempt));
        before - rows.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// All rows in insertion order.
    pub fn rows_snapshot(&self) -> Vec<Row> {
        self.rows.lock().iter().map(|t| t.row.clone()).collect()
    }
}
