// Wire messages between the frontend and workers.
//
// Messages are serde structs encoded with bincode and carried in
// length-prefixed frames (see `frame`). The request names its target through
// a resource path; responses stream back a summary followed by row batches.

pub mod frame;

use serde::{Deserialize, Serialize};

use crate::global::{AttemptId, ChunkId, JobId, QueryId};
use crate::rowstore::Row;

/// One per-chunk task as dispatched to a worker.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TaskMsg {
    pub query_id: QueryId,
    pub job_id: JobId,
    pub attempt: AttemptId,
    pub chunk_id: ChunkId,
    pub db: String,
    /// SQL statements run in order against the local row store.
    pub fragments: Vec<String>,
    /// Czar-side table the results merge into.
    pub result_table: String,
    /// Shared-scan tables (`db.table`); empty marks interactive work.
    pub scan_tables: Vec<String>,
    /// Session identity; always equals `query_id`.
    pub session: QueryId,
}

impl TaskMsg {
    pub fn is_interactive(&self) -> bool {
        self.scan_tables.is_empty()
    }
}

/// Cooperative cancellation keyed by `(query_id, job_id)`; a `None` job
/// cancels every task of the query on the worker.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct CancelMsg {
    pub query_id: QueryId,
    pub job_id: Option<JobId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum WorkerRequest {
    Task(TaskMsg),
    Cancel(CancelMsg),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum ResponseStatus {
    Success,
    Error,
    Cancelled,
}

/// Terminal report for one task attempt.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct ResponseSummary {
    pub query_id: QueryId,
    pub job_id: JobId,
    pub attempt: AttemptId,
    pub status: ResponseStatus,
    pub rows_sent: u64,
    /// Result schema, as reported by the row store.
    pub columns: Vec<String>,
    pub error_code: Option<i32>,
    pub error_msg: Option<String>,
}

/// One streamed batch of result rows.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct RowBatch {
    pub query_id: QueryId,
    pub job_id: JobId,
    pub attempt: AttemptId,
    pub last: bool,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum WorkerResponse {
    Batch(RowBatch),
    Summary(ResponseSummary),
}

/// Encode any wire message with the crate-standard bincode configuration.
pub fn encode<T: bincode::Encode>(msg: &T) -> crate::error::Result<Vec<u8>> {
    Ok(bincode::encode_to_vec(msg, bincode::config::standard())?)
}

/// Decode any wire message, rejecting trailing garbage.
pub fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> crate::error::Result<T> {
    let (msg, used) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    if used != bytes.len() {
        return Err(crate::error::Error::Serialization(format!(
            "{} trailing bytes after message",
            bytes.len() - used
        )));
    }
    Ok(msg)
}
