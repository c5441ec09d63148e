// Per-job execution state.
//
// A `JobStatus` receives timestamped state reports as one chunk job moves
// through dispatch, response handling and merging. Transitions are monotonic
// in the state-graph order below; terminal states accept no further
// transition. Readers always see a consistent (state, time, code,
// description) snapshot.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Lifecycle states, in state-graph order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Unknown,
    Provision,
    ProvisionNack,
    Request,
    RequestError,
    ResponseReady,
    ResponseError,
    ResponseData,
    ResponseDataNack,
    ResponseDataError,
    ResponseDataErrorOk,
    ResponseDataErrorCorrupt,
    ResponseDone,
    ResultError,
    MergeOk,
    MergeError,
    Cancel,
    Complete,
}

impl JobState {
    /// Position in the state graph; transitions never decrease it.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Unknown => 0,
            JobState::Provision => 1,
            JobState::ProvisionNack => 2,
            JobState::Request => 3,
            JobState::RequestError => 4,
            JobState::ResponseReady => 5,
            JobState::ResponseError => 6,
            JobState::ResponseData => 7,
            JobState::ResponseDataNack => 8,
            JobState::ResponseDataError => 9,
            JobState::ResponseDataErrorOk => 10,
            JobState::ResponseDataErrorCorrupt => 11,
            JobState::ResponseDone => 12,
            JobState::ResultError => 13,
            JobState::MergeOk => 14,
            JobState::MergeError => 15,
            JobState::Cancel => 16,
            JobState::Complete => 17,
        }
    }

    /// Terminal states: `Complete`, every `*Error`, and `Cancel`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::RequestError
                | JobState::ResponseError
                | JobState::ResponseDataError
                | JobState::ResponseDataErrorCorrupt
                | JobState::ResultError
                | JobState::MergeError
                | JobState::Cancel
                | JobState::Complete
        )
    }

    pub fn is_error(self) -> bool {
        self.is_terminal() && !matches!(self, JobState::Complete | JobState::Cancel)
    }
}

/// Consistent snapshot of the current state triple.
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub state: JobState,
    pub time: DateTime<Utc>,
    pub code: i32,
    pub desc: String,
}

impl Default for StatusInfo {
    fn default() -> Self {
        StatusInfo {
            state: JobState::Unknown,
            time: Utc::now(),
            code: 0,
            desc: String::new(),
        }
    }
}

#[derive(Default)]
pub struct JobStatus {
    info: Mutex<StatusInfo>,
}

impl JobStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the state triple. Returns false (leaving the
    /// triple untouched) when the transition is illegal: the current state
    /// is terminal, or the new state would move backwards.
    pub fn update_info(&self, state: JobState, code: i32, desc: &str) -> bool {
        let mut info = self.info.lock();
        if info.state.is_terminal() {
            warn!(
                from = ?info.state,
                to = ?state,
                "ignoring state update on terminal job status"
            );
            return false;
        }
        // Cancel is reachable from any non-terminal state; everything else
        // must make forward progress (same-rank re-entry covers retries).
        if state != JobState::Cancel && state.rank() < info.state.rank() {
            warn!(from = ?info.state, to = ?state, "ignoring backwards state update");
            return false;
        }
        debug!(to = ?state, code, desc, "job state update");
        info.state = state;
        info.time = Utc::now();
        info.code = code;
        info.desc = desc.to_string();
        true
    }

    pub fn info(&self) -> StatusInfo {
        self.info.lock().clone()
    }

    pub fn state(&self) -> JobState {
        self.info.lock().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.info();
        write!(
            f,
            "{:?} at {} code={} {}",
            info.state,
            info.time.to_rfc3339(),
            info.code,
            info.desc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_accepted() {
        let s = JobStatus::new();
        assert!(s.update_info(JobState::Provision, 0, ""));
        assert!(s.update_info(JobState::Request, 0, ""));
        assert!(s.update_info(JobState::ResponseReady, 0, ""));
        assert!(s.update_info(JobState::ResponseDone, 0, ""));
        assert!(s.update_info(JobState::MergeOk, 0, ""));
        assert!(s.update_info(JobState::Complete, 0, "done"));
        assert_eq!(s.state(), JobState::Complete);
    }

    #[test]
    fn backwards_transition_rejected() {
        let s = JobStatus::new();
        assert!(s.update_info(JobState::ResponseData, 0, ""));
        assert!(!s.update_info(JobState::Request, 0, ""));
        assert_eq!(s.state(), JobState::ResponseData);
    }

    #[test]
    fn same_rank_reentry_allowed_for_retries() {
        let s = JobStatus::new();
        assert!(s.update_info(JobState::Request, 0, "attempt 1"));
        assert!(s.update_info(JobState::Request, 0, "attempt 2"));
    }

    #[test]
    fn terminal_states_are_final() {
        let s = JobStatus::new();
        assert!(s.update_info(JobState::ResultError, -6, "boom"));
        assert!(!s.update_info(JobState::Complete, 0, ""));
        assert!(!s.update_info(JobState::Cancel, 0, ""));
        assert_eq!(s.state(), JobState::ResultError);
        assert!(s.state().is_error());
    }

    #[test]
    fn cancel_reachable_from_any_nonterminal() {
        let s = JobStatus::new();
        assert!(s.update_info(JobState::ResponseData, 0, ""));
        assert!(s.update_info(JobState::Cancel, 0, "squash"));
        assert!(s.is_terminal());
        assert!(!s.state().is_error());
    }

    #[test]
    fn snapshot_is_consistent() {
        let s = JobStatus::new();
        s.update_info(JobState::Request, 7, "sent");
        let info = s.info();
        assert_eq!(info.state, JobState::Request);
        assert_eq!(info.code, 7);
        assert_eq!(info.desc, "sent");
    }
}
