// Per-query orchestration.
//
// One executive owns every chunk job of one user query: it submits them to
// the messenger from a small pool of dispatch threads, re-drives transient
// transport failures within the retry budget (scrubbing the superseded
// attempt first), funnels results into the response handlers, and wakes
// `join` when the last job reaches a terminal state. Cancellation is
// edge-triggered and cooperative.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::dispatch::job_description::JobDescription;
use crate::dispatch::job_query::JobQuery;
use crate::dispatch::job_status::JobState;
use crate::dispatch::message_store::{MessageSeverity, MessageStore};
use crate::dispatch::messenger::Messenger;
use crate::error::{Error, Result};
use crate::global::{ChunkId, JobId, QueryId};
use crate::merge::result_store::{ResultFile, ResultFileStore};
use crate::proto::{CancelMsg, ResponseStatus, ResponseSummary, RowBatch};

/// Aggregate state reported by `join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Unknown,
    Success,
    Error,
    Cancel,
}

struct Counts {
    incomplete: usize,
    error_seen: bool,
}

pub struct Executive {
    query_id: QueryId,
    max_retries: u32,
    messenger: Arc<dyn Messenger>,
    message_store: Arc<MessageStore>,
    result_files: Arc<ResultFileStore>,
    jobs: Mutex<HashMap<JobId, Arc<JobQuery>>>,
    counts: Mutex<Counts>,
    done_cv: Condvar,
    cancelled: AtomicBool,
    skipped_empty: AtomicUsize,
    // Dropped on squash so queued work drains and dispatch threads exit
    // once the executive goes away.
    tx: Mutex<Option<Sender<Arc<JobQuery>>>>,
}

impl Executive {
    pub fn new(
        query_id: QueryId,
        max_retries: u32,
        dispatch_threads: usize,
        messenger: Arc<dyn Messenger>,
        message_store: Arc<MessageStore>,
        result_files: Arc<ResultFileStore>,
    ) -> Arc<Self> {
        let (tx, rx) = unbounded::<Arc<JobQuery>>();
        let exec = Arc::new(Executive {
            query_id,
            max_retries,
            messenger,
            message_store,
            result_files,
            jobs: Mutex::new(HashMap::new()),
            counts: Mutex::new(Counts {
                incomplete: 0,
                error_seen: false,
            }),
            done_cv: Condvar::new(),
            cancelled: AtomicBool::new(false),
            skipped_empty: AtomicUsize::new(0),
            tx: Mutex::new(Some(tx)),
        });
        for i in 0..dispatch_threads.max(1) {
            let rx: Receiver<Arc<JobQuery>> = rx.clone();
            std::thread::Builder::new()
                .name(format!("dispatch-{query_id}-{i}"))
                .spawn(move || {
                    // The channel disconnects when the executive drops its
                    // sender; jobs keep only a weak reference back.
                    while let Ok(job) = rx.recv() {
                        if let Some(exec) = job.executive() {
                            exec.drive(&job);
                        }
                    }
                })
                .ok();
        }
        exec
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn message_store(&self) -> &Arc<MessageStore> {
        &self.message_store
    }

    /// Enqueue one chunk job. Fails with `Cancelled` once the executive has
    /// been squashed.
    pub fn add(self: &Arc<Self>, desc: JobDescription) -> Result<Arc<JobQuery>> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        let job_id = desc.job_id();
        let job = JobQuery::new(desc, Arc::downgrade(self), self.max_retries);
        {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&job_id) {
                return Err(Error::Internal(format!("duplicate job id {job_id}")));
            }
            jobs.insert(job_id, Arc::clone(&job));
        }
        self.counts.lock().incomplete += 1;
        job.status()
            .update_info(JobState::Provision, 0, "queued for dispatch");
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) => {
                tx.send(Arc::clone(&job))
                    .map_err(|_| Error::Cancelled)?;
            }
            None => return Err(Error::Cancelled),
        }
        Ok(job)
    }

    /// Record a chunk the planner skipped via the empty-chunk set: treated
    /// as instantly successful with zero rows, no job is created.
    pub fn mark_skipped_empty(&self, chunk: ChunkId) {
        debug!(query_id = self.query_id, chunk, "empty chunk skipped");
        self.skipped_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped_empty(&self) -> usize {
        self.skipped_empty.load(Ordering::Relaxed)
    }

    pub fn job(&self, job_id: JobId) -> Option<Arc<JobQuery>> {
        self.jobs.lock().get(&job_id).cloned()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Block until every enqueued job is terminal.
    pub fn join(&self) -> QueryState {
        let mut counts = self.counts.lock();
        while counts.incomplete > 0 {
            self.done_cv.wait(&mut counts);
        }
        if self.cancelled.load(Ordering::Acquire) {
            QueryState::Cancel
        } else if counts.error_seen {
            QueryState::Error
        } else {
            QueryState::Success
        }
    }

    /// Cooperative cancellation of all outstanding jobs. Idempotent.
    pub fn squash(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(query_id = self.query_id, "squashing query");
        let jobs: Vec<Arc<JobQuery>> = self.jobs.lock().values().cloned().collect();
        for job in jobs {
            if job.status().is_terminal() {
                continue;
            }
            job.cancel();
            let cancel_msg = CancelMsg {
                query_id: self.query_id,
                job_id: Some(job.job_id()),
            };
            if let Err(e) = self
                .messenger
                .cancel(job.description().resource(), &cancel_msg)
            {
                warn!(query_id = self.query_id, job_id = job.job_id(), error = %e,
                      "cancel message failed");
            }
        }
    }

    /// Terminal bookkeeping for one job; fires the completion condition when
    /// the outstanding count reaches zero.
    pub fn mark_completed(&self, job_id: JobId, success: bool) {
        debug!(query_id = self.query_id, job_id, success, "job completed");
        let mut counts = self.counts.lock();
        counts.incomplete = counts.incomplete.saturating_sub(1);
        if !success && !self.cancelled.load(Ordering::Acquire) {
            counts.error_seen = true;
        }
        if counts.incomplete == 0 {
            self.done_cv.notify_all();
        }
    }

    fn drive(&self, job: &Arc<JobQuery>) {
        loop {
            if job.is_cancelled() || self.cancelled.load(Ordering::Acquire) {
                job.cancel();
                self.mark_completed(job.job_id(), false);
                return;
            }
            let attempt = job.attempt();
            job.status()
                .update_info(JobState::Request, 0, &format!("attempt {attempt}"));
            let task = job.description().task_for_attempt(attempt);
            match self.messenger.deliver(job.description().resource(), &task) {
                Ok((summary, batches)) => match summary.status {
                    ResponseStatus::Success => {
                        self.handle_success(job, summary, batches);
                        return;
                    }
                    ResponseStatus::Cancelled => {
                        job.cancel();
                        self.mark_completed(job.job_id(), false);
                        return;
                    }
                    ResponseStatus::Error => {
                        self.handle_worker_error(job, &summary);
                        return;
                    }
                },
                Err(e) if e.is_retriable() && !job.is_cancelled() => {
                    self.message_store.add_message(
                        task.chunk_id,
                        "messenger",
                        e.code(),
                        &format!("attempt {attempt} failed: {e}"),
                        MessageSeverity::Info,
                    );
                    match job.prepare_retry() {
                        Some(next) => {
                            std::thread::sleep(retry_backoff(next));
                            continue;
                        }
                        None => {
                            self.fail_transport(job, &e);
                            return;
                        }
                    }
                }
                Err(e) => {
                    self.fail_transport(job, &e);
                    return;
                }
            }
        }
    }

    fn handle_success(
        &self,
        job: &Arc<JobQuery>,
        summary: ResponseSummary,
        batches: Vec<RowBatch>,
    ) {
        if job.is_cancelled() || self.cancelled.load(Ordering::Acquire) {
            job.cancel();
            self.mark_completed(job.job_id(), false);
            return;
        }
        job.status().update_info(
            JobState::ResponseData,
            0,
            &format!("{} rows inbound", summary.rows_sent),
        );
        // Reassemble the streamed file; batch order is production order.
        let mut rows = Vec::new();
        for batch in batches {
            rows.extend(batch.rows);
        }
        let url = ResultFileStore::url_for(self.query_id, job.job_id(), summary.attempt);
        self.result_files.insert(
            &url,
            ResultFile {
                columns: summary.columns.clone(),
                rows,
            },
        );
        job.status()
            .update_info(JobState::ResponseDone, 0, "response complete");

        let flush = job
            .description()
            .resp_handler()
            .flush_http(&url, summary.rows_sent);
        if flush.success {
            job.status().update_info(JobState::MergeOk, 0, "merged");
            job.status().update_info(
                JobState::Complete,
                0,
                &format!("{} rows merged", flush.result_rows),
            );
            self.mark_completed(job.job_id(), true);
        } else {
            let merge_err = Error::Merge(format!("merge failed for job {}", job.job_id()));
            job.status()
                .update_info(JobState::MergeError, merge_err.code(), &merge_err.to_string());
            self.mark_completed(job.job_id(), false);
            if flush.should_cancel {
                self.squash();
            }
        }
    }

    fn handle_worker_error(&self, job: &Arc<JobQuery>, summary: &ResponseSummary) {
        let code = summary.error_code.unwrap_or(-1);
        let msg = summary.error_msg.as_deref().unwrap_or("worker error");
        job.status().update_info(JobState::ResponseError, code, msg);
        job.description().resp_handler().flush_http_error(code, msg, 0);
        self.mark_completed(job.job_id(), false);
    }

    fn fail_transport(&self, job: &Arc<JobQuery>, e: &Error) {
        job.status()
            .update_info(JobState::RequestError, e.code(), &e.to_string());
        job.description()
            .resp_handler()
            .error_flush(&e.to_string(), e.code());
        self.message_store.add_message(
            job.description().task_for_attempt(job.attempt()).chunk_id,
            "messenger",
            e.code(),
            &e.to_string(),
            MessageSeverity::Error,
        );
        self.mark_completed(job.job_id(), false);
    }
}

impl Drop for Executive {
    fn drop(&mut self) {
        // Disconnect dispatch threads.
        self.tx.lock().take();
    }
}

fn retry_backoff(attempt: u32) -> Duration {
    let base = 50u64.saturating_mul(attempt as u64);
    let jitter = rand::rng().random_range(0..50u64);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::response_handler::{FlushResult, ResponseHandler};
    use crate::global::{AttemptId, ResourceUnit};
    use crate::proto::TaskMsg;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicU32;

    /// Handler that records scrubs and merges everything it is given.
    #[derive(Default)]
    struct RecordingHandler {
        scrubs: PlMutex<Vec<(JobId, AttemptId)>>,
        merged_rows: AtomicUsize,
        errors: PlMutex<Vec<String>>,
        cancels: AtomicUsize,
    }

    impl ResponseHandler for RecordingHandler {
        fn flush_http(&self, _file_url: &str, expected_rows: u64) -> FlushResult {
            self.merged_rows
                .fetch_add(expected_rows as usize, Ordering::SeqCst);
            FlushResult::ok(expected_rows)
        }

        fn flush_http_error(&self, _code: i32, msg: &str, _status: i32) {
            self.errors.lock().push(msg.to_string());
        }

        fn prep_scrub_results(&self, job_id: JobId, attempt: AttemptId) {
            self.scrubs.lock().push((job_id, attempt));
        }

        fn error_flush(&self, msg: &str, _code: i32) {
            self.errors.lock().push(msg.to_string());
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Messenger failing the first `fail_attempts` deliveries per job.
    struct FlakyMessenger {
        fail_attempts: u32,
        calls: AtomicU32,
        rows_per_job: u64,
    }

    impl Messenger for FlakyMessenger {
        fn deliver(
            &self,
            _resource: &ResourceUnit,
            task: &TaskMsg,
        ) -> Result<(ResponseSummary, Vec<RowBatch>)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if task.attempt <= self.fail_attempts {
                return Err(Error::Transport("connection reset".to_string()));
            }
            Ok((
                ResponseSummary {
                    query_id: task.query_id,
                    job_id: task.job_id,
                    attempt: task.attempt,
                    status: ResponseStatus::Success,
                    rows_sent: self.rows_per_job,
                    columns: vec!["a".to_string()],
                    error_code: None,
                    error_msg: None,
                },
                Vec::new(),
            ))
        }

        fn cancel(&self, _resource: &ResourceUnit, _msg: &CancelMsg) -> Result<()> {
            Ok(())
        }
    }

    fn task(query_id: QueryId, job_id: JobId, chunk: ChunkId) -> TaskMsg {
        TaskMsg {
            query_id,
            job_id,
            attempt: 1,
            chunk_id: chunk,
            db: "sky".to_string(),
            fragments: vec![format!("SELECT * FROM Object_{chunk}")],
            result_table: "result_1".to_string(),
            scan_tables: Vec::new(),
            session: query_id,
        }
    }

    fn desc(
        query_id: QueryId,
        job_id: JobId,
        chunk: ChunkId,
        handler: Arc<dyn ResponseHandler>,
    ) -> JobDescription {
        let resource = ResourceUnit::from_path(&ResourceUnit::make_path(chunk, "sky"));
        JobDescription::new(query_id, job_id, resource, task(query_id, job_id, chunk), "rt", handler)
    }

    fn executive(messenger: Arc<dyn Messenger>, max_retries: u32) -> Arc<Executive> {
        Executive::new(
            1,
            max_retries,
            2,
            messenger,
            Arc::new(MessageStore::new()),
            Arc::new(ResultFileStore::new()),
        )
    }

    #[test]
    fn all_jobs_succeed() {
        let messenger = Arc::new(FlakyMessenger {
            fail_attempts: 0,
            calls: AtomicU32::new(0),
            rows_per_job: 5,
        });
        let exec = executive(messenger, 3);
        let handler: Arc<RecordingHandler> = Arc::new(RecordingHandler::default());
        for job_id in 0..4 {
            exec.add(desc(1, job_id, 100 + job_id, handler.clone())).unwrap();
        }
        assert_eq!(exec.join(), QueryState::Success);
        assert_eq!(handler.merged_rows.load(Ordering::SeqCst), 20);
        let jobs = exec.job_count();
        assert_eq!(jobs, 4);
        for job_id in 0..4 {
            assert_eq!(exec.job(job_id).unwrap().status().state(), JobState::Complete);
        }
    }

    #[test]
    fn transport_errors_retry_with_scrub() {
        let messenger = Arc::new(FlakyMessenger {
            fail_attempts: 2,
            calls: AtomicU32::new(0),
            rows_per_job: 7,
        });
        let exec = executive(messenger.clone(), 3);
        let handler: Arc<RecordingHandler> = Arc::new(RecordingHandler::default());
        exec.add(desc(1, 10, 10, handler.clone())).unwrap();
        assert_eq!(exec.join(), QueryState::Success);
        // Attempts 1 and 2 failed, were scrubbed, and attempt 3 merged.
        assert_eq!(*handler.scrubs.lock(), vec![(10, 1), (10, 2)]);
        assert_eq!(handler.merged_rows.load(Ordering::SeqCst), 7);
        assert_eq!(messenger.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_budget_exhaustion_is_error() {
        let messenger = Arc::new(FlakyMessenger {
            fail_attempts: u32::MAX,
            calls: AtomicU32::new(0),
            rows_per_job: 0,
        });
        let exec = executive(messenger, 2);
        let handler: Arc<RecordingHandler> = Arc::new(RecordingHandler::default());
        let job = exec.add(desc(1, 0, 3, handler.clone())).unwrap();
        assert_eq!(exec.join(), QueryState::Error);
        assert_eq!(job.status().state(), JobState::RequestError);
        assert!(!handler.errors.lock().is_empty());
    }

    #[test]
    fn add_after_squash_rejected() {
        let messenger = Arc::new(FlakyMessenger {
            fail_attempts: 0,
            calls: AtomicU32::new(0),
            rows_per_job: 0,
        });
        let exec = executive(messenger, 3);
        exec.squash();
        let handler: Arc<RecordingHandler> = Arc::new(RecordingHandler::default());
        assert!(matches!(
            exec.add(desc(1, 0, 3, handler)),
            Err(Error::Cancelled)
        ));
        assert_eq!(exec.join(), QueryState::Cancel);
    }

    #[test]
    fn squash_is_idempotent_and_joins_cancel() {
        struct SlowMessenger;
        impl Messenger for SlowMessenger {
            fn deliver(
                &self,
                _resource: &ResourceUnit,
                task: &TaskMsg,
            ) -> Result<(ResponseSummary, Vec<RowBatch>)> {
                std::thread::sleep(Duration::from_millis(30));
                Ok((
                    ResponseSummary {
                        query_id: task.query_id,
                        job_id: task.job_id,
                        attempt: task.attempt,
                        status: ResponseStatus::Success,
                        rows_sent: 0,
                        columns: Vec::new(),
                        error_code: None,
                        error_msg: None,
                    },
                    Vec::new(),
                ))
            }
            fn cancel(&self, _resource: &ResourceUnit, _msg: &CancelMsg) -> Result<()> {
                Ok(())
            }
        }
        let exec = Executive::new(
            1,
            3,
            2,
            Arc::new(SlowMessenger),
            Arc::new(MessageStore::new()),
            Arc::new(ResultFileStore::new()),
        );
        let handler: Arc<RecordingHandler> = Arc::new(RecordingHandler::default());
        for job_id in 0..20 {
            exec.add(desc(1, job_id, job_id, handler.clone())).unwrap();
        }
        exec.squash();
        exec.squash();
        assert_eq!(exec.join(), QueryState::Cancel);
        // Every job is terminal, either Complete (finished first) or Cancel.
        for job_id in 0..20 {
            let state = exec.job(job_id).unwrap().status().state();
            assert!(
                matches!(state, JobState::Complete | JobState::Cancel),
                "job {job_id} in {state:?}"
            );
        }
    }

    #[test]
    fn empty_chunk_skip_counts() {
        let messenger = Arc::new(FlakyMessenger {
            fail_attempts: 0,
            calls: AtomicU32::new(0),
            rows_per_job: 0,
        });
        let exec = executive(messenger, 3);
        exec.mark_skipped_empty(3);
        exec.mark_skipped_empty(5);
        assert_eq!(exec.skipped_empty(), 2);
        assert_eq!(exec.join(), QueryState::Success);
    }
}
