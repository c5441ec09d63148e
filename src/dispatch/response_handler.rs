// Result-handling contract between the executive and the merger.

use crate::global::{AttemptId, JobId};

/// Outcome of one `flush_http` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    pub success: bool,
    /// True when table writing failed unrecoverably and the whole query
    /// should be squashed.
    pub should_cancel: bool,
    /// Rows actually merged.
    pub result_rows: u64,
}

impl FlushResult {
    pub fn ok(result_rows: u64) -> Self {
        FlushResult {
            success: true,
            should_cancel: false,
            result_rows,
        }
    }

    pub fn failed(should_cancel: bool) -> Self {
        FlushResult {
            success: false,
            should_cancel,
            result_rows: 0,
        }
    }
}

/// Handles result bytes for one job. Jobs are submitted to an executive
/// naming a resource unit, a request payload, and one of these to return
/// rows through; the implementation merges incoming partials into the
/// query's result table.
pub trait ResponseHandler: Send + Sync {
    /// Pull the worker-produced result file for one job attempt, validate
    /// the row count, and merge the rows.
    fn flush_http(&self, file_url: &str, expected_rows: u64) -> FlushResult;

    /// Record a worker-reported error. The first error per job is
    /// authoritative; later ones are demoted to informational messages.
    fn flush_http_error(&self, error_code: i32, error_msg: &str, status: i32);

    /// Remove any rows previously merged for `(job_id, attempt)`. Must
    /// complete before the first row of a newer attempt is merged.
    fn prep_scrub_results(&self, job_id: JobId, attempt: AttemptId);

    /// Unrecoverable terminal signal; no further calls are expected.
    fn error_flush(&self, msg: &str, code: i32);

    /// Cancellation hook: release any buffers held for this job.
    fn cancel(&self);
}
