// Immutable description of one chunk job.

use std::fmt;
use std::sync::Arc;

use crate::dispatch::response_handler::ResponseHandler;
use crate::error::Result;
use crate::global::{AttemptId, JobId, QueryId, ResourceUnit};
use crate::proto::TaskMsg;

/// Everything needed to dispatch one per-chunk job. Owns no mutable state;
/// the attempt counter lives on the `JobQuery`.
pub struct JobDescription {
    query_id: QueryId,
    job_id: JobId,
    resource: ResourceUnit,
    task: TaskMsg,
    chunk_result_name: String,
    resp_handler: Arc<dyn ResponseHandler>,
}

impl JobDescription {
    pub fn new(
        query_id: QueryId,
        job_id: JobId,
        resource: ResourceUnit,
        task: TaskMsg,
        chunk_result_name: &str,
        resp_handler: Arc<dyn ResponseHandler>,
    ) -> Self {
        JobDescription {
            query_id,
            job_id,
            resource,
            task,
            chunk_result_name: chunk_result_name.to_string(),
            resp_handler,
        }
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn resource(&self) -> &ResourceUnit {
        &self.resource
    }

    pub fn chunk_result_name(&self) -> &str {
        &self.chunk_result_name
    }

    pub fn resp_handler(&self) -> &Arc<dyn ResponseHandler> {
        &self.resp_handler
    }

    /// The task message for a given attempt.
    pub fn task_for_attempt(&self, attempt: AttemptId) -> TaskMsg {
        let mut task = self.task.clone();
        task.attempt = attempt;
        task
    }

    /// Serialized request payload for a given attempt.
    pub fn payload(&self, attempt: AttemptId) -> Result<Vec<u8>> {
        crate::proto::encode(&self.task_for_attempt(attempt))
    }

    pub fn is_interactive(&self) -> bool {
        self.task.is_interactive()
    }
}

impl fmt::Debug for JobDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescription")
            .field("query_id", &self.query_id)
            .field("job_id", &self.job_id)
            .field("resource", &self.resource.path())
            .field("chunk_result_name", &self.chunk_result_name)
            .finish()
    }
}
