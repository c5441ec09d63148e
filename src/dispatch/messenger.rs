// Transport contract used by the executive.
//
// `deliver` is a blocking request/response exchange for one task attempt;
// the executive drives it from its dispatch threads and owns the retry
// policy. `cancel` is best-effort and must not block on worker progress.

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::global::{ChunkId, ResourceUnit, UnitType};
use crate::proto::{CancelMsg, ResponseSummary, RowBatch, TaskMsg};

pub trait Messenger: Send + Sync {
    /// Deliver one task attempt to the worker named by `resource` and wait
    /// for its summary plus streamed row batches. Transport-level failures
    /// (connect, frame, decode) are `Error::Transport` and retriable;
    /// worker-side execution failures come back inside the summary.
    fn deliver(
        &self,
        resource: &ResourceUnit,
        task: &TaskMsg,
    ) -> Result<(ResponseSummary, Vec<RowBatch>)>;

    /// Ask the worker to interrupt matching tasks.
    fn cancel(&self, resource: &ResourceUnit, msg: &CancelMsg) -> Result<()>;
}

/// Chunk-to-worker resolution, supplied by the external registry. The
/// returned string is a worker address for the TCP messenger or a worker id
/// for the in-process one.
pub trait WorkerRegistry: Send + Sync {
    fn worker_for(&self, resource: &ResourceUnit) -> Result<String>;
}

/// Fixed mapping, loaded at startup or populated by tests.
#[derive(Default)]
pub struct StaticWorkerRegistry {
    by_chunk: DashMap<(String, ChunkId), String>,
    default_worker: parking_lot::Mutex<Option<String>>,
}

impl StaticWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_chunk(&self, db: &str, chunk: ChunkId, worker: &str) {
        self.by_chunk
            .insert((db.to_string(), chunk), worker.to_string());
    }

    /// Worker used for chunks without an explicit mapping.
    pub fn set_default_worker(&self, worker: &str) {
        *self.default_worker.lock() = Some(worker.to_string());
    }
}

impl WorkerRegistry for StaticWorkerRegistry {
    fn worker_for(&self, resource: &ResourceUnit) -> Result<String> {
        match resource.unit_type() {
            UnitType::DbChunk | UnitType::CQuery => {
                let key = (resource.db().to_string(), resource.chunk());
                if let Some(worker) = self.by_chunk.get(&key) {
                    return Ok(worker.clone());
                }
                self.default_worker.lock().clone().ok_or_else(|| {
                    Error::Transport(format!("no worker for resource {}", resource.path()))
                })
            }
            UnitType::Worker => Ok(resource.hash_name().to_string()),
            _ => Err(Error::InvalidResource(format!(
                "cannot route resource {}",
                resource.path()
            ))),
        }
    }
}
