// Per-query message timeline.
//
// Append-only, insertion-ordered, shared by every response handler of a
// query. This is the user-visible error log: the proxy reads it back to the
// client alongside the result rows.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::global::ChunkId;

/// Chunk id used for messages not tied to a chunk.
pub const NOTSET: ChunkId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct QueryMessage {
    pub chunk_id: ChunkId,
    pub source: String,
    pub code: i32,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub severity: MessageSeverity,
}

#[derive(Default)]
pub struct MessageStore {
    messages: Mutex<Vec<QueryMessage>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(
        &self,
        chunk_id: ChunkId,
        source: &str,
        code: i32,
        description: &str,
        severity: MessageSeverity,
    ) {
        self.add_message_at(chunk_id, source, code, description, severity, Utc::now());
    }

    /// Append with an explicit timestamp (workers report their own clocks).
    pub fn add_message_at(
        &self,
        chunk_id: ChunkId,
        source: &str,
        code: i32,
        description: &str,
        severity: MessageSeverity,
        timestamp: DateTime<Utc>,
    ) {
        match severity {
            MessageSeverity::Error => {
                error!(chunk_id, source, code, description, "query message")
            }
            MessageSeverity::Info => {
                debug!(chunk_id, source, code, description, "query message")
            }
        }
        let msg = QueryMessage {
            chunk_id,
            source: source.to_string(),
            code,
            description: description.to_string(),
            timestamp,
            severity,
        };
        self.messages.lock().push(msg);
    }

    pub fn add_error_message(&self, source: &str, description: &str) {
        self.add_message(NOTSET, source, NOTSET, description, MessageSeverity::Error);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn message_count_with_code(&self, code: i32) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.code == code)
            .count()
    }

    pub fn get_message(&self, idx: usize) -> Option<QueryMessage> {
        self.messages.lock().get(idx).cloned()
    }

    /// First error-severity message, if any: the authoritative user-facing
    /// failure summary.
    pub fn first_error(&self) -> Option<QueryMessage> {
        self.messages
            .lock()
            .iter()
            .find(|m| m.severity == MessageSeverity::Error)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<QueryMessage> {
        self.messages.lock().clone()
    }
}
