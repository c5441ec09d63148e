// Worker-scoped job bundles.
//
// An uber-job groups the chunk jobs of one query that land on the same
// worker, addressed by a `/worker/<id>` resource. The members stay ordinary
// `JobQuery` objects owned by the executive; the bundle adds worker-level
// bookkeeping and cancellation fan-out.

use std::sync::Arc;

use crate::dispatch::job_query::JobQuery;
use crate::dispatch::job_status::JobState;
use crate::global::{QueryId, ResourceUnit};

pub struct UberJob {
    query_id: QueryId,
    uber_id: u64,
    resource: ResourceUnit,
    jobs: Vec<Arc<JobQuery>>,
}

impl UberJob {
    pub fn new(query_id: QueryId, uber_id: u64, worker_id: &str, jobs: Vec<Arc<JobQuery>>) -> Self {
        UberJob {
            query_id,
            uber_id,
            resource: ResourceUnit::from_path(&ResourceUnit::make_worker_path(worker_id)),
            jobs,
        }
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn uber_id(&self) -> u64 {
        self.uber_id
    }

    pub fn resource(&self) -> &ResourceUnit {
        &self.resource
    }

    pub fn jobs(&self) -> &[Arc<JobQuery>] {
        &self.jobs
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// True once every member job is terminal.
    pub fn is_finished(&self) -> bool {
        self.jobs.iter().all(|j| j.status().is_terminal())
    }

    /// True if any member failed (cancellation is not failure).
    pub fn has_error(&self) -> bool {
        self.jobs.iter().any(|j| j.status().state().is_error())
    }

    /// Cooperative cancel of every non-terminal member.
    pub fn cancel(&self) {
        for job in &self.jobs {
            if !job.status().is_terminal() {
                job.cancel();
            }
        }
    }

    /// Completed member count, for progress reporting.
    pub fn completed_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status().state() == JobState::Complete)
            .count()
    }
}

impl std::fmt::Debug for UberJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UberJob")
            .field("query_id", &self.query_id)
            .field("uber_id", &self.uber_id)
            .field("resource", &self.resource.path())
            .field("jobs", &self.jobs.len())
            .finish()
    }
}

/// Group one query's jobs by the worker that will run them, producing one
/// bundle per worker in first-seen order.
pub fn group_by_worker(
    query_id: QueryId,
    assignments: Vec<(String, Arc<JobQuery>)>,
) -> Vec<UberJob> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: Vec<Vec<Arc<JobQuery>>> = Vec::new();
    for (worker, job) in assignments {
        match order.iter().position(|w| *w == worker) {
            Some(pos) => buckets[pos].push(job),
            None => {
                order.push(worker);
                buckets.push(vec![job]);
            }
        }
    }
    order
        .into_iter()
        .zip(buckets)
        .enumerate()
        .map(|(i, (worker, jobs))| UberJob::new(query_id, i as u64, &worker, jobs))
        .collect()
}
