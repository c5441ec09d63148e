// Worker daemon entry point.
//
// Bootstraps one worker process: configuration, logging, the in-memory row
// store (external stores attach through the same trait), the processor with
// its scheduler and admission gates, and the TCP frame server. Exit code is
// non-zero only for bootstrap failures; query-level errors travel back to
// the frontend in the result channel.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use skyserv::config::WorkerConfig;
use skyserv::rowstore::MemRowStore;
use skyserv::worker::WorkerProcessor;
use skyserv::xfer::WorkerServer;

fn load_config() -> skyserv::Result<WorkerConfig> {
    match std::env::args().nth(1) {
        Some(path) => WorkerConfig::from_file(Path::new(&path)),
        None => Ok(WorkerConfig::default()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "bad configuration");
            return ExitCode::from(2);
        }
    };

    let rowstore = Arc::new(MemRowStore::new());
    let processor = match WorkerProcessor::new(&cfg, rowstore) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "worker bootstrap failed");
            return ExitCode::from(2);
        }
    };

    info!(addr = %cfg.transport.listen_addr, "starting worker");
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.transport.num_processing_threads.max(1))
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "runtime start failed");
            return ExitCode::from(2);
        }
    };

    let server = WorkerServer::new(processor, cfg.transport.clone());
    if let Err(e) = runtime.block_on(server.run()) {
        error!(error = %e, "worker server failed");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
