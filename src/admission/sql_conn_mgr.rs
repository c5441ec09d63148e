// Row-store connection admission.
//
// Caps concurrent row-store connections well below the store's own limit:
// running the store out of connections hurts everything on the host. Scan
// tasks additionally respect the lower scan cap, so the gap between the two
// caps stays available to interactive tasks even when shared scans have the
// worker saturated.

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::config::AdmissionConfig;

#[derive(Default)]
struct Counts {
    total: usize,
    scan: usize,
}

pub struct SqlConnMgr {
    max_sql_connections: usize,
    max_scan_sql_connections: usize,
    counts: Mutex<Counts>,
    cv: Condvar,
}

/// Point-in-time counters for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct SqlConnStats {
    pub total: usize,
    pub scan: usize,
    pub max_sql_connections: usize,
    pub max_scan_sql_connections: usize,
}

impl SqlConnMgr {
    pub fn new(cfg: &AdmissionConfig) -> Self {
        SqlConnMgr {
            max_sql_connections: cfg.max_sql_connections,
            max_scan_sql_connections: cfg.max_scan_sql_connections,
            counts: Mutex::new(Counts::default()),
            cv: Condvar::new(),
        }
    }

    /// Block until a connection slot is available, then hold it for the
    /// guard's lifetime.
    pub fn take(&self, scan_query: bool) -> SqlConnLock<'_> {
        let mut counts = self.counts.lock();
        if scan_query {
            while counts.scan >= self.max_scan_sql_connections
                || counts.total >= self.max_sql_connections
            {
                self.cv.wait(&mut counts);
            }
            counts.scan += 1;
        } else {
            while counts.total >= self.max_sql_connections {
                self.cv.wait(&mut counts);
            }
        }
        counts.total += 1;
        SqlConnLock {
            mgr: self,
            scan_query,
        }
    }

    fn release(&self, scan_query: bool) {
        let mut counts = self.counts.lock();
        counts.total -= 1;
        if scan_query {
            counts.scan -= 1;
        }
        drop(counts);
        self.cv.notify_all();
    }

    pub fn stats(&self) -> SqlConnStats {
        let counts = self.counts.lock();
        SqlConnStats {
            total: counts.total,
            scan: counts.scan,
            max_sql_connections: self.max_sql_connections,
            max_scan_sql_connections: self.max_scan_sql_connections,
        }
    }
}

/// Scoped connection slot.
pub struct SqlConnLock<'a> {
    mgr: &'a SqlConnMgr,
    scan_query: bool,
}

impl Drop for SqlConnLock<'_> {
    fn drop(&mut self) {
        self.mgr.release(self.scan_query);
    }
}
