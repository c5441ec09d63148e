// The worker thread pool.
//
// A dynamic pool bounded by `(min_threads, min_threads_per_session,
// max_threads, init_threads)`: threads are created lazily as work arrives
// and scavenged after sitting idle, never dropping below the minimum. Pool
// threads pull from the blend scheduler, run each task through the
// registered runner, and report completion back to the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::sched::blend_scheduler::BlendScheduler;
use crate::sched::Scheduler;
use crate::worker::task::Task;

/// Executes one task; implemented by the worker processor.
pub trait TaskRunner: Send + Sync {
    fn run_task(&self, task: Arc<Task>);
}

struct PoolState {
    threads: usize,
    idle: usize,
}

pub struct DynamicWorkQueue {
    cfg: SchedulerConfig,
    sched: Arc<BlendScheduler>,
    // Weak: the runner (processor) owns the pool, not the reverse.
    runner: Mutex<Option<Weak<dyn TaskRunner>>>,
    state: Mutex<PoolState>,
    shutdown: AtomicBool,
}

impl DynamicWorkQueue {
    pub fn new(cfg: SchedulerConfig, sched: Arc<BlendScheduler>) -> Arc<Self> {
        Arc::new(DynamicWorkQueue {
            cfg,
            sched,
            runner: Mutex::new(None),
            state: Mutex::new(PoolState {
                threads: 0,
                idle: 0,
            }),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Register the task runner and start the initial threads.
    pub fn set_runner(self: &Arc<Self>, runner: &Arc<dyn TaskRunner>) {
        *self.runner.lock() = Some(Arc::downgrade(runner));
        let init = self.cfg.init_threads.clamp(self.cfg.min_threads, self.cfg.max_threads);
        let mut state = self.state.lock();
        while state.threads < init {
            if !self.spawn_thread() {
                break;
            }
            state.threads += 1;
        }
    }

    /// Queue one task and grow the pool if the backlog warrants it.
    pub fn submit(self: &Arc<Self>, task: Arc<Task>) {
        self.sched.queue_cmd(task);
        self.maybe_spawn();
    }

    pub fn scheduler(&self) -> &Arc<BlendScheduler> {
        &self.sched
    }

    pub fn thread_count(&self) -> usize {
        self.state.lock().threads
    }

    /// Stop accepting work and wake every idle thread so it can exit.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.sched.wake_all();
    }

    fn maybe_spawn(self: &Arc<Self>) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.lock();
        let sessions = self.sched.session_count();
        let desired = (sessions * self.cfg.min_threads_per_session)
            .max(self.cfg.min_threads)
            .min(self.cfg.max_threads);
        let backlog = self.sched.queued_count();
        while state.threads < self.cfg.max_threads
            && (state.threads < desired || backlog > state.idle)
        {
            if !self.spawn_thread() {
                break;
            }
            state.threads += 1;
            // One new thread per backlog item at most.
            if state.threads >= desired && state.threads >= backlog {
                break;
            }
        }
    }

    fn spawn_thread(self: &Arc<Self>) -> bool {
        let pool = Arc::clone(self);
        match std::thread::Builder::new()
            .name("worker-pool".to_string())
            .spawn(move || pool.worker_loop())
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "failed to spawn pool thread");
                false
            }
        }
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.state.lock().idle += 1;
            let got = self.sched.get_cmd_timeout(self.cfg.idle_timeout());
            self.state.lock().idle -= 1;
            match got {
                Some(task) => {
                    let runner = self.runner.lock().as_ref().and_then(Weak::upgrade);
                    match runner {
                        Some(runner) => runner.run_task(Arc::clone(&task)),
                        None => warn!("task dropped: no runner registered"),
                    }
                    self.sched.command_finish(&task);
                }
                None => {
                    // Idle timeout: scavenge surplus threads. Check and
                    // decrement under one lock so concurrent timeouts cannot
                    // drop the pool below its minimum.
                    let mut state = self.state.lock();
                    if state.threads > self.cfg.min_threads
                        && self.sched.queued_count() == 0
                    {
                        state.threads -= 1;
                        debug!(threads = state.threads, "pool thread scavenged");
                        return;
                    }
                }
            }
        }
        // Shutdown path.
        let mut state = self.state.lock();
        state.threads -= 1;
        debug!(threads = state.threads, "pool thread exiting");
    }
}

impl Drop for DynamicWorkQueue {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.sched.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TaskMsg;
    use crate::worker::send_channel::CollectingSendChannel;
    use parking_lot::Condvar;
    use std::time::Duration;

    struct CountingRunner {
        state: Mutex<usize>,
        cv: Condvar,
    }

    impl CountingRunner {
        fn new() -> Arc<Self> {
            Arc::new(CountingRunner {
                state: Mutex::new(0),
                cv: Condvar::new(),
            })
        }

        fn wait_for(&self, n: usize, timeout: Duration) -> bool {
            let deadline = std::time::Instant::now() + timeout;
            let mut count = self.state.lock();
            while *count < n {
                if self.cv.wait_until(&mut count, deadline).timed_out() {
                    return false;
                }
            }
            true
        }
    }

    impl TaskRunner for CountingRunner {
        fn run_task(&self, _task: Arc<Task>) {
            std::thread::sleep(Duration::from_millis(2));
            let mut count = self.state.lock();
            *count += 1;
            self.cv.notify_all();
        }
    }

    fn task(session: u64, job: i32) -> Arc<Task> {
        let msg = TaskMsg {
            query_id: session,
            job_id: job,
            attempt: 1,
            chunk_id: job,
            db: "sky".to_string(),
            fragments: vec!["SELECT 1".to_string()],
            result_table: "r".to_string(),
            scan_tables: Vec::new(),
            session,
        };
        Task::from_msg(msg, CollectingSendChannel::new())
    }

    fn cfg(min: usize, max: usize) -> SchedulerConfig {
        SchedulerConfig {
            min_threads: min,
            min_threads_per_session: 1,
            max_threads: max,
            init_threads: min,
            idle_timeout_ms: 50,
        }
    }

    #[test]
    fn runs_all_submitted_tasks() {
        let sched = BlendScheduler::new();
        let pool = DynamicWorkQueue::new(cfg(1, 4), sched);
        let runner = CountingRunner::new();
        let runner_dyn: Arc<dyn TaskRunner> = runner.clone();
        pool.set_runner(&runner_dyn);
        for job in 0..16 {
            pool.submit(task(1, job));
        }
        assert!(runner.wait_for(16, Duration::from_secs(5)));
        assert!(pool.thread_count() <= 4);
        pool.shutdown();
    }

    #[test]
    fn grows_lazily_and_scavenges() {
        let sched = BlendScheduler::new();
        let pool = DynamicWorkQueue::new(cfg(1, 8), sched);
        let runner = CountingRunner::new();
        let runner_dyn: Arc<dyn TaskRunner> = runner.clone();
        pool.set_runner(&runner_dyn);
        assert_eq!(pool.thread_count(), 1);
        for job in 0..8 {
            pool.submit(task(job as u64, job));
        }
        assert!(runner.wait_for(8, Duration::from_secs(5)));
        // After the idle timeout surplus threads exit, down to the minimum.
        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(pool.thread_count(), 1);
        pool.shutdown();
    }
}
