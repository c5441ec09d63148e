// The worker-side dispatcher.
//
// Accepts task messages from the transport, registers them with the blend
// scheduler through the dynamic pool, and runs them: row-store execution
// under `SqlConnMgr` admission, then batched transmission under
// `TransmitMgr` admission with stream-buffer backpressure. Cancellation is
// cooperative, keyed by `(query_id, job_id)`.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::admission::{SqlConnMgr, TransmitMgr};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::global::{JobId, QueryId};
use crate::proto::{self, CancelMsg, ResponseStatus, ResponseSummary, RowBatch, TaskMsg, WorkerResponse};
use crate::rowstore::RowStore;
use crate::sched::blend_scheduler::SchedulerStats;
use crate::sched::{BlendScheduler, DynamicWorkQueue, Scheduler, TaskRunner};
use crate::worker::send_channel::SendChannel;
use crate::worker::stream_buffer::StreamBuffer;
use crate::worker::task::Task;

pub struct WorkerProcessor {
    rowstore: Arc<dyn RowStore>,
    pool: Arc<DynamicWorkQueue>,
    sql_mgr: Arc<SqlConnMgr>,
    transmit_mgr: Arc<TransmitMgr>,
    live: DashMap<(QueryId, JobId), Arc<Task>>,
    // Tasks in flight per database resource, for the monitoring surface.
    resource_counts: DashMap<String, usize>,
    batch_rows: usize,
}

/// Point-in-time worker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub scheduler: SchedulerStats,
    pub sql_connections: crate::admission::sql_conn_mgr::SqlConnStats,
    pub transmits: crate::admission::transmit_mgr::TransmitStats,
    pub live_tasks: usize,
    pub stream_buffer_bytes: usize,
    pub resources: Vec<(String, usize)>,
}

impl WorkerProcessor {
    pub fn new(cfg: &WorkerConfig, rowstore: Arc<dyn RowStore>) -> Result<Arc<Self>> {
        cfg.validate()?;
        let sched = BlendScheduler::new();
        let pool = DynamicWorkQueue::new(cfg.scheduler.clone(), sched);
        let processor = Arc::new(WorkerProcessor {
            rowstore,
            pool,
            sql_mgr: Arc::new(SqlConnMgr::new(&cfg.admission)),
            transmit_mgr: Arc::new(TransmitMgr::new(&cfg.admission)),
            live: DashMap::new(),
            resource_counts: DashMap::new(),
            batch_rows: cfg.runtime.result_batch_rows,
        });
        let runner: Arc<dyn TaskRunner> = processor.clone() as Arc<dyn TaskRunner>;
        processor.pool.set_runner(&runner);
        Ok(processor)
    }

    /// Accept one task from the transport and schedule it.
    pub fn process_task(&self, msg: TaskMsg, send: Arc<dyn SendChannel>) -> Result<()> {
        debug!(
            query_id = msg.query_id,
            job_id = msg.job_id,
            attempt = msg.attempt,
            chunk_id = msg.chunk_id,
            scan = !msg.scan_tables.is_empty(),
            "task accepted"
        );
        let task = Task::from_msg(msg, send);
        *self
            .resource_counts
            .entry(task.db().to_string())
            .or_insert(0) += 1;
        self.live
            .insert((task.query_id(), task.job_id()), Arc::clone(&task));
        self.pool.submit(task);
        Ok(())
    }

    /// Interrupt matching tasks. Running tasks notice the flag at their next
    /// checkpoint; queued tasks are drained and acknowledged immediately.
    pub fn handle_cancel(&self, msg: &CancelMsg) -> usize {
        let mut hit = 0;
        for entry in self.live.iter() {
            let (query_id, job_id) = *entry.key();
            if query_id != msg.query_id {
                continue;
            }
            if msg.job_id.is_none() || msg.job_id == Some(job_id) {
                entry.value().interrupt();
                hit += 1;
            }
        }
        if msg.job_id.is_none() {
            // Whole-query cancel: drop anything still queued right away.
            for task in self.pool.scheduler().cancel_queued(msg.query_id) {
                self.ack_cancel(&task);
                self.finish_task(&task);
            }
        }
        info!(query_id = msg.query_id, job_id = ?msg.job_id, hit, "cancel processed");
        hit
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            scheduler: self.pool.scheduler().stats(),
            sql_connections: self.sql_mgr.stats(),
            transmits: self.transmit_mgr.stats(),
            live_tasks: self.live.len(),
            stream_buffer_bytes: StreamBuffer::total_bytes(),
            resources: self
                .resource_counts
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    fn ack_cancel(&self, task: &Task) {
        let summary = ResponseSummary {
            query_id: task.query_id(),
            job_id: task.job_id(),
            attempt: task.attempt(),
            status: ResponseStatus::Cancelled,
            rows_sent: 0,
            columns: Vec::new(),
            error_code: None,
            error_msg: None,
        };
        if let Err(e) = task.send_channel().send_summary(summary) {
            warn!(query_id = task.query_id(), job_id = task.job_id(), error = %e,
                  "cancel ack failed");
        }
    }

    fn finish_task(&self, task: &Task) {
        self.live.remove(&(task.query_id(), task.job_id()));
        if let Some(mut count) = self.resource_counts.get_mut(task.db()) {
            *count = count.saturating_sub(1);
        }
    }

    /// Run the task body: row-store execution, then batched transmit.
    fn execute(&self, task: &Task) -> Result<(u64, Vec<String>)> {
        // Scoped admission: released on every exit path.
        let _conn = self.sql_mgr.take(task.is_scan());
        if task.is_interrupted() {
            return Err(Error::Cancelled);
        }

        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        for fragment in task.fragments() {
            // Checked between fragments.
            if task.is_interrupted() {
                return Err(Error::Cancelled);
            }
            let result = self.rowstore.execute(task.db(), fragment)?;
            if columns.is_empty() {
                columns = result.columns;
            } else if columns != result.columns {
                return Err(Error::RowStore(format!(
                    "fragment schema mismatch: {:?} vs {:?}",
                    columns, result.columns
                )));
            }
            rows.extend(result.rows);
        }

        let total = rows.len() as u64;
        let mut batches: Vec<Vec<crate::rowstore::Row>> = Vec::new();
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            batches.push(rows.by_ref().take(self.batch_rows).collect());
        }
        let batch_count = batches.len();
        for (i, batch_rows) in batches.into_iter().enumerate() {
            // Checked between batches.
            if task.is_interrupted() {
                return Err(Error::Cancelled);
            }
            let last = i + 1 == batch_count;
            let batch = RowBatch {
                query_id: task.query_id(),
                job_id: task.job_id(),
                attempt: task.attempt(),
                last,
                rows: batch_rows,
            };
            // Buffers carry a complete response frame so any transport can
            // put the bytes on the wire untouched.
            let buffer = StreamBuffer::create(proto::encode(&WorkerResponse::Batch(batch))?);
            {
                let _slot = self
                    .transmit_mgr
                    .take(task.is_interactive(), task.query_id());
                if let Err(e) = task.send_channel().send_batch(Arc::clone(&buffer), last) {
                    // The transport refused the buffer, so the recycle falls
                    // back to us or the self-reference would never release.
                    buffer.recycle();
                    return Err(e);
                }
                // Reuse no memory until the transport recycles the buffer.
                if !buffer.wait_for_done() {
                    return Err(Error::Cancelled);
                }
            }
        }
        Ok((total, columns))
    }
}

impl TaskRunner for WorkerProcessor {
    fn run_task(&self, task: Arc<Task>) {
        if task.is_interrupted() {
            self.ack_cancel(&task);
            self.finish_task(&task);
            return;
        }
        let summary = match self.execute(&task) {
            Ok((rows_sent, columns)) => ResponseSummary {
                query_id: task.query_id(),
                job_id: task.job_id(),
                attempt: task.attempt(),
                status: ResponseStatus::Success,
                rows_sent,
                columns,
                error_code: None,
                error_msg: None,
            },
            Err(Error::Cancelled) => {
                self.ack_cancel(&task);
                self.finish_task(&task);
                return;
            }
            Err(e) => {
                warn!(query_id = task.query_id(), job_id = task.job_id(), error = %e,
                      "task failed");
                ResponseSummary {
                    query_id: task.query_id(),
                    job_id: task.job_id(),
                    attempt: task.attempt(),
                    status: ResponseStatus::Error,
                    rows_sent: 0,
                    columns: Vec::new(),
                    error_code: Some(e.code()),
                    error_msg: Some(e.to_string()),
                }
            }
        };
        if let Err(e) = task.send_channel().send_summary(summary) {
            warn!(query_id = task.query_id(), job_id = task.job_id(), error = %e,
                  "summary send failed");
        }
        self.finish_task(&task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowstore::{MemRowStore, Value};
    use crate::worker::send_channel::CollectingSendChannel;

    fn worker_with_table() -> Arc<WorkerProcessor> {
        let store = MemRowStore::new();
        store.register_table(
            "sky",
            "Object_3",
            vec!["id", "ra"],
            vec![
                vec![Value::Int(1), Value::Float(1.5)],
                vec![Value::Int(2), Value::Float(2.5)],
            ],
        );
        let mut cfg = WorkerConfig::default();
        cfg.runtime.result_batch_rows = 1;
        WorkerProcessor::new(&cfg, Arc::new(store)).unwrap()
    }

    fn msg(job_id: JobId, fragment: &str) -> TaskMsg {
        TaskMsg {
            query_id: 9,
            job_id,
            attempt: 1,
            chunk_id: 3,
            db: "sky".to_string(),
            fragments: vec![fragment.to_string()],
            result_table: "r".to_string(),
            scan_tables: Vec::new(),
            session: 9,
        }
    }

    #[test]
    fn executes_and_streams_batches() {
        let worker = worker_with_table();
        let chan = CollectingSendChannel::new();
        worker
            .process_task(msg(1, "SELECT id, ra FROM Object_3"), chan.clone())
            .unwrap();
        let (summary, batches) = chan.wait();
        assert_eq!(summary.status, ResponseStatus::Success);
        assert_eq!(summary.rows_sent, 2);
        assert_eq!(summary.columns, vec!["id", "ra"]);
        // batch_rows = 1: two batches, last flagged.
        assert_eq!(batches.len(), 2);
        assert!(batches[1].last);
        assert!(!batches[0].last);
        worker.shutdown();
    }

    #[test]
    fn bad_sql_reports_error_summary() {
        let worker = worker_with_table();
        let chan = CollectingSendChannel::new();
        worker
            .process_task(msg(2, "SELECT id FROM NoSuchTable_3"), chan.clone())
            .unwrap();
        let (summary, batches) = chan.wait();
        assert_eq!(summary.status, ResponseStatus::Error);
        assert!(summary.error_msg.unwrap().contains("no such table"));
        assert!(batches.is_empty());
        worker.shutdown();
    }

    #[test]
    fn multi_fragment_results_concatenate() {
        let worker = worker_with_table();
        let chan = CollectingSendChannel::new();
        let mut m = msg(3, "SELECT id, ra FROM Object_3");
        m.fragments.push("SELECT id, ra FROM Object_3".to_string());
        worker.process_task(m, chan.clone()).unwrap();
        let (summary, _batches) = chan.wait();
        assert_eq!(summary.rows_sent, 4);
        worker.shutdown();
    }

    #[test]
    fn cancel_of_queued_task_acks() {
        let worker = worker_with_table();
        let chan = CollectingSendChannel::new();
        let mut m = msg(4, "SELECT id FROM Object_3");
        m.query_id = 77;
        m.session = 77;
        worker.process_task(m, chan.clone()).unwrap();
        worker.handle_cancel(&CancelMsg {
            query_id: 77,
            job_id: None,
        });
        let (summary, _batches) = chan.wait();
        // Either the task ran before the cancel landed or it was drained;
        // both are terminal and acknowledged.
        assert!(matches!(
            summary.status,
            ResponseStatus::Success | ResponseStatus::Cancelled
        ));
        worker.shutdown();
    }

    #[test]
    fn stats_surface_counters() {
        let worker = worker_with_table();
        let stats = worker.stats();
        assert_eq!(stats.live_tasks, 0);
        assert!(stats.sql_connections.max_sql_connections >= 2);
        worker.shutdown();
    }
}
