// Routing scheduler.
//
// Routes each incoming task by its scan-tables annotation: annotated tasks
// go to the shared-scan scheduler, everything else to the group scheduler.
// Interactive (group) work is offered to threads first. This is the
// scheduler the thread pool talks to; it owns the condition variable that
// blocking gets sleep on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::global::QueryId;
use crate::sched::group_scheduler::GroupScheduler;
use crate::sched::scan_scheduler::ScanScheduler;
use crate::sched::Scheduler;
use crate::worker::task::Task;

pub struct BlendScheduler {
    group: GroupScheduler,
    scan: ScanScheduler,
    running: AtomicUsize,
    wakeup: Mutex<()>,
    cv: Condvar,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub sessions: usize,
    pub scan_groups: usize,
}

impl BlendScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(BlendScheduler {
            group: GroupScheduler::new(),
            scan: ScanScheduler::new(),
            running: AtomicUsize::new(0),
            wakeup: Mutex::new(()),
            cv: Condvar::new(),
        })
    }

    fn try_get(&self) -> Option<Arc<Task>> {
        // Interactive work first, then the shared-scan front group.
        let task = self.group.try_get().or_else(|| self.scan.try_get());
        if task.is_some() {
            self.running.fetch_add(1, Ordering::Relaxed);
        }
        task
    }

    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.queued_count(),
            running: self.running_count(),
            sessions: self.session_count(),
            scan_groups: self.scan.group_count(),
        }
    }

    /// Wake every thread blocked in a get, e.g. for pool shutdown.
    pub fn wake_all(&self) {
        let _guard = self.wakeup.lock();
        self.cv.notify_all();
    }
}

impl Scheduler for BlendScheduler {
    fn queue_cmd(&self, task: Arc<Task>) {
        if task.is_scan() {
            self.scan.queue(task);
        } else {
            self.group.queue(task);
        }
        self.wake_all();
    }

    fn get_cmd(&self, wait: bool) -> Option<Arc<Task>> {
        loop {
            if let Some(task) = self.try_get() {
                return Some(task);
            }
            if !wait {
                return None;
            }
            let mut guard = self.wakeup.lock();
            // Re-check under the wakeup lock to avoid missing a notify.
            if let Some(task) = self.try_get() {
                return Some(task);
            }
            self.cv.wait(&mut guard);
        }
    }

    fn get_cmd_timeout(&self, timeout: Duration) -> Option<Arc<Task>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_get() {
                return Some(task);
            }
            let mut guard = self.wakeup.lock();
            if let Some(task) = self.try_get() {
                return Some(task);
            }
            if self.cv.wait_until(&mut guard, deadline).timed_out() {
                return self.try_get();
            }
        }
    }

    fn command_finish(&self, task: &Arc<Task>) {
        if task.is_scan() {
            self.scan.finish(task);
        } else {
            self.group.finish(task);
        }
        self.running.fetch_sub(1, Ordering::Relaxed);
        // Finishing may unblock the next scan group.
        self.wake_all();
    }

    fn cancel_queued(&self, query_id: QueryId) -> Vec<Arc<Task>> {
        let mut removed = self.group.cancel_queued(query_id);
        removed.extend(self.scan.cancel_queued(query_id));
        removed
    }

    fn queued_count(&self) -> usize {
        self.group.queued_count() + self.scan.queued_count()
    }

    fn session_count(&self) -> usize {
        self.group.session_count() + self.scan.session_count()
    }
}
