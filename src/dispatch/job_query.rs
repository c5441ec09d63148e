// One in-flight chunk job.
//
// Owns the immutable description plus the mutable status and attempt
// counter. The back-reference to the executive is weak: the executive owns
// its jobs, never the other way around.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::dispatch::executive::Executive;
use crate::dispatch::job_description::JobDescription;
use crate::dispatch::job_status::{JobState, JobStatus};
use crate::global::{AttemptId, JobId, QueryId};

pub struct JobQuery {
    desc: JobDescription,
    status: Arc<JobStatus>,
    attempt: AtomicU32,
    cancelled: AtomicBool,
    executive: Weak<Executive>,
    max_retries: u32,
}

impl JobQuery {
    pub fn new(desc: JobDescription, executive: Weak<Executive>, max_retries: u32) -> Arc<Self> {
        Arc::new(JobQuery {
            desc,
            status: Arc::new(JobStatus::new()),
            attempt: AtomicU32::new(1),
            cancelled: AtomicBool::new(false),
            executive,
            max_retries,
        })
    }

    pub fn description(&self) -> &JobDescription {
        &self.desc
    }

    pub fn query_id(&self) -> QueryId {
        self.desc.query_id()
    }

    pub fn job_id(&self) -> JobId {
        self.desc.job_id()
    }

    pub fn status(&self) -> &Arc<JobStatus> {
        &self.status
    }

    pub fn executive(&self) -> Option<Arc<Executive>> {
        self.executive.upgrade()
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt.load(Ordering::Acquire)
    }

    /// Retry bookkeeping: scrub the failed attempt's rows, then bump the
    /// counter. Returns the new attempt number, or `None` when the retry
    /// budget is spent.
    pub fn prepare_retry(&self) -> Option<AttemptId> {
        let current = self.attempt.load(Ordering::Acquire);
        if current > self.max_retries {
            return None;
        }
        // The scrub must land before any row of the new attempt merges.
        self.desc
            .resp_handler()
            .prep_scrub_results(self.job_id(), current);
        let next = current + 1;
        self.attempt.store(next, Ordering::Release);
        debug!(
            query_id = self.query_id(),
            job_id = self.job_id(),
            attempt = next,
            "retrying job"
        );
        Some(next)
    }

    /// Cooperative cancellation: flag the job, move the status to Cancel
    /// unless already terminal, and let the handler release its buffers.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.status.update_info(JobState::Cancel, 0, "squashed");
        self.desc.resp_handler().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for JobQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQuery")
            .field("query_id", &self.query_id())
            .field("job_id", &self.job_id())
            .field("attempt", &self.attempt())
            .field("state", &self.status.state())
            .finish()
    }
}
