// Shared-resource admission control below the scheduler. Both gates are
// scoped acquisitions: a task takes a guard on entry to the critical region
// and every exit path releases it.

pub mod sql_conn_mgr;
pub mod transmit_mgr;

pub use sql_conn_mgr::{SqlConnLock, SqlConnMgr};
pub use transmit_mgr::{TransmitLock, TransmitMgr};
