// In-process messenger.
//
// Wires the executive straight into worker processors living in the same
// process. Delivery runs the full worker path (scheduler, admissions,
// stream buffers); only the socket is missing.

use std::sync::Arc;

use dashmap::DashMap;

use crate::dispatch::messenger::{Messenger, WorkerRegistry};
use crate::error::{Error, Result};
use crate::global::ResourceUnit;
use crate::proto::{CancelMsg, ResponseSummary, RowBatch, TaskMsg};
use crate::worker::send_channel::CollectingSendChannel;
use crate::worker::WorkerProcessor;

pub struct LocalMessenger {
    registry: Arc<dyn WorkerRegistry>,
    workers: DashMap<String, Arc<WorkerProcessor>>,
}

impl LocalMessenger {
    pub fn new(registry: Arc<dyn WorkerRegistry>) -> Self {
        LocalMessenger {
            registry,
            workers: DashMap::new(),
        }
    }

    pub fn register_worker(&self, worker_id: &str, processor: Arc<WorkerProcessor>) {
        self.workers.insert(worker_id.to_string(), processor);
    }

    fn processor_for(&self, resource: &ResourceUnit) -> Result<Arc<WorkerProcessor>> {
        let worker_id = self.registry.worker_for(resource)?;
        self.workers
            .get(&worker_id)
            .map(|p| Arc::clone(&p))
            .ok_or_else(|| Error::Transport(format!("no such worker: {worker_id}")))
    }
}

impl Messenger for LocalMessenger {
    fn deliver(
        &self,
        resource: &ResourceUnit,
        task: &TaskMsg,
    ) -> Result<(ResponseSummary, Vec<RowBatch>)> {
        let processor = self.processor_for(resource)?;
        let chan = CollectingSendChannel::new();
        processor.process_task(task.clone(), chan.clone())?;
        Ok(chan.wait())
    }

    fn cancel(&self, resource: &ResourceUnit, msg: &CancelMsg) -> Result<()> {
        let processor = self.processor_for(resource)?;
        processor.handle_cancel(msg);
        Ok(())
    }
}
