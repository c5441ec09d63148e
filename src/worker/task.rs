// One unit of worker-side work.
//
// Immutable description of what to run, plus the cooperative interrupt flag
// checked between fragments and between batches. Tasks for the same
// `(query_id, db)` sharing scan tables are candidates for one shared pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::global::{AttemptId, ChunkId, JobId, QueryId};
use crate::proto::TaskMsg;
use crate::worker::send_channel::SendChannel;

pub struct Task {
    query_id: QueryId,
    job_id: JobId,
    attempt: AttemptId,
    chunk_id: ChunkId,
    db: String,
    fragments: Vec<String>,
    result_table: String,
    /// Sorted for a stable scan-group key.
    scan_tables: Vec<String>,
    interrupted: AtomicBool,
    send: Arc<dyn SendChannel>,
}

impl Task {
    pub fn from_msg(msg: TaskMsg, send: Arc<dyn SendChannel>) -> Arc<Self> {
        let mut scan_tables = msg.scan_tables;
        scan_tables.sort();
        scan_tables.dedup();
        Arc::new(Task {
            query_id: msg.query_id,
            job_id: msg.job_id,
            attempt: msg.attempt,
            chunk_id: msg.chunk_id,
            db: msg.db,
            fragments: msg.fragments,
            result_table: msg.result_table,
            scan_tables,
            interrupted: AtomicBool::new(false),
            send,
        })
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    /// Session identity for fair-share scheduling; unified with query id.
    pub fn session(&self) -> QueryId {
        self.query_id
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn chunk_id(&self) -> ChunkId {
        self.chunk_id
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn result_table(&self) -> &str {
        &self.result_table
    }

    pub fn scan_tables(&self) -> &[String] {
        &self.scan_tables
    }

    pub fn is_scan(&self) -> bool {
        !self.scan_tables.is_empty()
    }

    pub fn is_interactive(&self) -> bool {
        self.scan_tables.is_empty()
    }

    /// Key grouping tasks that can share one table pass.
    pub fn scan_group_key(&self) -> String {
        self.scan_tables.join(",")
    }

    pub fn send_channel(&self) -> &Arc<dyn SendChannel> {
        &self.send
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("query_id", &self.query_id)
            .field("job_id", &self.job_id)
            .field("attempt", &self.attempt)
            .field("chunk_id", &self.chunk_id)
            .field("db", &self.db)
            .field("scan", &self.is_scan())
            .finish()
    }
}
