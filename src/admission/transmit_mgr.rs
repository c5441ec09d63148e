// Outbound transmit admission.
//
// Two caps govern result transmits back to the frontend: a global cap on
// concurrently transmitting non-interactive tasks, and a secondary per-query
// cap so no single user query monopolizes the wire. Interactive tasks bypass
// the global cap but still respect the per-query cap.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::config::AdmissionConfig;
use crate::global::QueryId;

#[derive(Default)]
struct State {
    /// Non-interactive holders, bounded by `max_transmits`.
    transmitting: usize,
    /// All holders, per query id, each bounded by `max_per_query`.
    qid_counts: HashMap<QueryId, usize>,
    total: usize,
}

pub struct TransmitMgr {
    max_transmits: usize,
    max_per_query: usize,
    state: Mutex<State>,
    cv: Condvar,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransmitStats {
    pub total: usize,
    pub transmitting: usize,
    pub active_queries: usize,
    pub max_transmits: usize,
    pub max_per_query: usize,
}

impl TransmitMgr {
    pub fn new(cfg: &AdmissionConfig) -> Self {
        TransmitMgr {
            max_transmits: cfg.max_transmits,
            max_per_query: cfg.max_per_query_transmits,
            state: Mutex::new(State::default()),
            cv: Condvar::new(),
        }
    }

    /// Block until this task may transmit, then hold the slot for the
    /// guard's lifetime.
    pub fn take(&self, interactive: bool, query_id: QueryId) -> TransmitLock<'_> {
        let mut state = self.state.lock();
        loop {
            let qid_ok =
                state.qid_counts.get(&query_id).copied().unwrap_or(0) < self.max_per_query;
            let global_ok = interactive || state.transmitting < self.max_transmits;
            if qid_ok && global_ok {
                break;
            }
            self.cv.wait(&mut state);
        }
        *state.qid_counts.entry(query_id).or_insert(0) += 1;
        state.total += 1;
        if !interactive {
            state.transmitting += 1;
        }
        TransmitLock {
            mgr: self,
            interactive,
            query_id,
        }
    }

    fn release(&self, interactive: bool, query_id: QueryId) {
        let mut state = self.state.lock();
        state.total -= 1;
        if !interactive {
            state.transmitting -= 1;
        }
        if let Some(count) = state.qid_counts.get_mut(&query_id) {
            *count -= 1;
            if *count == 0 {
                state.qid_counts.remove(&query_id);
            }
        }
        drop(state);
        self.cv.notify_all();
    }

    pub fn stats(&self) -> TransmitStats {
        let state = self.state.lock();
        TransmitStats {
            total: state.total,
            transmitting: state.transmitting,
            active_queries: state.qid_counts.len(),
            max_transmits: self.max_transmits,
            max_per_query: self.max_per_query,
        }
    }
}

/// Scoped transmit slot.
pub struct TransmitLock<'a> {
    mgr: &'a TransmitMgr,
    interactive: bool,
    query_id: QueryId,
}

impl Drop for TransmitLock<'_> {
    fn drop(&mut self) {
        self.mgr.release(self.interactive, self.query_id);
    }
}
