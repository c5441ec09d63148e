use thiserror::Error;

/// Crate-wide error type.
///
/// Variants map onto the recovery classes used by the executive: planning
/// errors are terminal for the whole query, transport errors are retriable
/// up to the configured budget, worker execution errors are terminal for the
/// affected job, and cancellation is tracked separately from failure.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL parse error: {0}")]
    Parse(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Worker execution error (code {code}): {msg}")]
    WorkerExec { code: i32, msg: String },

    #[error("Row count mismatch for job {job_id}: expected {expected}, merged {actual}")]
    RowCountMismatch {
        job_id: i32,
        expected: u64,
        actual: u64,
    },

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Admission error: {0}")]
    Admission(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Key already exists: {0}")]
    KeyExists(String),

    #[error("No such key: {0}")]
    NoSuchKey(String),

    #[error("Metadata backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid resource path: {0}")]
    InvalidResource(String),

    #[error("Row store error: {0}")]
    RowStore(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors the messenger may re-drive within the retry budget.
    /// Logical failures (bad SQL, schema mismatch, merge trouble) are final.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Admission(_))
    }

    /// Numeric code reported into the message store for this error kind.
    pub fn code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Parse(_) => -2,
            Error::Planning(_) => -3,
            Error::Transport(_) => -4,
            Error::WorkerExec { code, .. } => *code,
            Error::RowCountMismatch { .. } => -6,
            Error::Merge(_) => -7,
            Error::Timeout(_) => -8,
            Error::Cancelled => -9,
            Error::Admission(_) => -10,
            Error::Config(_) => -11,
            Error::KeyExists(_) => -12,
            Error::NoSuchKey(_) => -13,
            Error::Backend(_) => -14,
            Error::Serialization(_) => -15,
            Error::InvalidResource(_) => -16,
            Error::RowStore(_) => -17,
            Error::Internal(_) => -18,
        }
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Io(e) => Error::Internal(format!("IO error: {e}")),
            Error::Parse(s) => Error::Parse(s.clone()),
            Error::Planning(s) => Error::Planning(s.clone()),
            Error::Transport(s) => Error::Transport(s.clone()),
            Error::WorkerExec { code, msg } => Error::WorkerExec {
                code: *code,
                msg: msg.clone(),
            },
            Error::RowCountMismatch {
                job_id,
                expected,
                actual,
            } => Error::RowCountMismatch {
                job_id: *job_id,
                expected: *expected,
                actual: *actual,
            },
            Error::Merge(s) => Error::Merge(s.clone()),
            Error::Timeout(s) => Error::Timeout(s.clone()),
            Error::Cancelled => Error::Cancelled,
            Error::Admission(s) => Error::Admission(s.clone()),
            Error::Config(s) => Error::Config(s.clone()),
            Error::KeyExists(s) => Error::KeyExists(s.clone()),
            Error::NoSuchKey(s) => Error::NoSuchKey(s.clone()),
            Error::Backend(s) => Error::Backend(s.clone()),
            Error::Serialization(s) => Error::Serialization(s.clone()),
            Error::InvalidResource(s) => Error::InvalidResource(s.clone()),
            Error::RowStore(s) => Error::RowStore(s.clone()),
            Error::Internal(s) => Error::Internal(s.clone()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(e: bincode::error::EncodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(e: bincode::error::DecodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
