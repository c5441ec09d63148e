// Process configuration.
//
// Serde-backed config structs with defaults suitable for a small test
// deployment. Every knob referenced elsewhere in the crate lives here so a
// deployment can be described by one JSON document per process role.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Frontend (query controller) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CzarConfig {
    // Retry budget for transient transport failures, per job.
    pub max_job_retries: u32,
    // Upper bound on planning time for one query.
    pub planning_timeout_ms: u64,
    // Upper bound on waiting for one worker response.
    pub worker_response_timeout_ms: u64,
    // Directory searched for per-database empty-chunk files.
    pub empty_chunk_path: String,
    // Single fallback empty-chunks file used when no per-db file exists.
    pub empty_chunk_fallback: String,
    // Database that holds per-query result tables.
    pub result_db: String,
    // Threads driving job dispatch per query.
    pub dispatch_threads: usize,
}

impl Default for CzarConfig {
    fn default() -> Self {
        Self {
            max_job_retries: 3,
            planning_timeout_ms: 10_000,
            worker_response_timeout_ms: 300_000,
            empty_chunk_path: ".".to_string(),
            empty_chunk_fallback: "emptyChunks.txt".to_string(),
            result_db: "qresult".to_string(),
            dispatch_threads: 8,
        }
    }
}

impl CzarConfig {
    pub fn worker_response_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_response_timeout_ms)
    }
}

/// Worker thread-pool bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    // Minimum number of pool threads kept alive overall.
    pub min_threads: usize,
    // Growth target per active session, capped by max_threads.
    pub min_threads_per_session: usize,
    // Hard upper bound on pool threads.
    pub max_threads: usize,
    // Threads created up front.
    pub init_threads: usize,
    // Idle time after which a surplus thread is scavenged.
    pub idle_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cores = num_cpus::get().max(2);
        Self {
            min_threads: 2,
            min_threads_per_session: 1,
            max_threads: cores * 2,
            init_threads: 2,
            idle_timeout_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Shared-resource admission caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    // Total concurrent row-store connections.
    pub max_sql_connections: usize,
    // Of those, how many shared-scan tasks may hold at once. The gap
    // (max_sql_connections - max_scan_sql_connections) stays available to
    // interactive tasks even when scans saturate their cap.
    pub max_scan_sql_connections: usize,
    // Concurrent outbound transmits for non-interactive tasks.
    pub max_transmits: usize,
    // Secondary cap: concurrent transmits per query id.
    pub max_per_query_transmits: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_sql_connections: 40,
            max_scan_sql_connections: 30,
            max_transmits: 40,
            max_per_query_transmits: 4,
        }
    }
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_sql_connections < 2 || self.max_scan_sql_connections < 2 {
            return Err(Error::Config(
                "sql connection caps must both be at least 2".to_string(),
            ));
        }
        if self.max_scan_sql_connections > self.max_sql_connections {
            return Err(Error::Config(format!(
                "max_scan_sql_connections ({}) exceeds max_sql_connections ({})",
                self.max_scan_sql_connections, self.max_sql_connections
            )));
        }
        if self.max_transmits == 0 || self.max_per_query_transmits == 0 {
            return Err(Error::Config("transmit caps must be positive".to_string()));
        }
        Ok(())
    }
}

/// TCP transport settings for the worker frame server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub listen_addr: String,
    // Largest accepted frame, request or response.
    pub max_frame_bytes: usize,
    pub num_processing_threads: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7650".to_string(),
            max_frame_bytes: 16 * 1024 * 1024,
            num_processing_threads: 2,
        }
    }
}

/// Whole worker-process configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub scheduler: SchedulerConfig,
    pub admission: AdmissionConfig,
    pub transport: TransportConfig,
    pub runtime: WorkerRuntimeConfig,
}

/// Worker task-execution knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRuntimeConfig {
    // Rows serialized into one result batch.
    pub result_batch_rows: usize,
}

impl Default for WorkerRuntimeConfig {
    fn default() -> Self {
        Self {
            result_batch_rows: 4096,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        self.admission.validate()?;
        if self.scheduler.max_threads == 0 {
            return Err(Error::Config("max_threads must be positive".to_string()));
        }
        if self.scheduler.min_threads > self.scheduler.max_threads {
            return Err(Error::Config(format!(
                "min_threads ({}) exceeds max_threads ({})",
                self.scheduler.min_threads, self.scheduler.max_threads
            )));
        }
        if self.runtime.result_batch_rows == 0 {
            return Err(Error::Config("result_batch_rows must be positive".to_string()));
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: WorkerConfig = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        WorkerConfig::default().validate().unwrap();
    }

    #[test]
    fn scan_cap_above_total_rejected() {
        let mut cfg = WorkerConfig::default();
        cfg.admission.max_scan_sql_connections = cfg.admission.max_sql_connections + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_roundtrip() {
        let cfg = WorkerConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        let back: WorkerConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.scheduler.max_threads, cfg.scheduler.max_threads);
        assert_eq!(back.admission.max_transmits, cfg.admission.max_transmits);
    }
}
