// Worker-side scheduling.
//
// The pluggable scheduler surface is `{queue_cmd, get_cmd, command_finish}`.
// `BlendScheduler` is what the thread pool talks to: it routes tasks with a
// shared-scan annotation to the `ScanScheduler` and everything else to the
// `GroupScheduler`, and owns the wakeup used by blocking gets.

pub mod blend_scheduler;
pub mod group_scheduler;
pub mod scan_scheduler;
pub mod work_queue;

use std::sync::Arc;
use std::time::Duration;

use crate::global::QueryId;
use crate::worker::task::Task;

pub use blend_scheduler::BlendScheduler;
pub use group_scheduler::GroupScheduler;
pub use scan_scheduler::ScanScheduler;
pub use work_queue::{DynamicWorkQueue, TaskRunner};

pub trait Scheduler: Send + Sync {
    /// Accept one task for later dispatch.
    fn queue_cmd(&self, task: Arc<Task>);

    /// Next runnable task. With `wait` set, blocks until one is available.
    fn get_cmd(&self, wait: bool) -> Option<Arc<Task>>;

    /// Like `get_cmd(true)`, bounded; `None` on timeout. Pool threads use
    /// this so surplus threads can be scavenged.
    fn get_cmd_timeout(&self, timeout: Duration) -> Option<Arc<Task>>;

    /// Report a dispatched task finished, releasing its slot bookkeeping.
    fn command_finish(&self, task: &Arc<Task>);

    /// Drop every queued (not yet running) task of one query. Returns the
    /// removed tasks so the caller can acknowledge their cancellation.
    fn cancel_queued(&self, query_id: QueryId) -> Vec<Arc<Task>>;

    /// Tasks currently queued.
    fn queued_count(&self) -> usize;

    /// Distinct sessions with queued or running work.
    fn session_count(&self) -> usize;
}
