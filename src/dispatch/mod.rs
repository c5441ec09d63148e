// Frontend-side dispatch: job lifecycle tracking, the per-query executive,
// and the messenger contract the transport implements.

pub mod executive;
pub mod job_description;
pub mod job_query;
pub mod job_status;
pub mod message_store;
pub mod messenger;
pub mod response_handler;
pub mod uber_job;

pub use executive::{Executive, QueryState};
pub use job_description::JobDescription;
pub use job_query::JobQuery;
pub use job_status::{JobState, JobStatus, StatusInfo};
pub use message_store::{MessageSeverity, MessageStore, QueryMessage};
pub use messenger::Messenger;
pub use response_handler::{FlushResult, ResponseHandler};
pub use uber_job::UberJob;
