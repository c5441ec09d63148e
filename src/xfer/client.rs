// Frontend-side TCP messenger.
//
// Blocking request/response over one connection per delivery, driven from
// the executive's dispatch threads. Connection and read failures surface as
// retriable transport errors; a read timeout is the per-operation worker
// response limit.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::dispatch::messenger::{Messenger, WorkerRegistry};
use crate::error::{Error, Result};
use crate::global::ResourceUnit;
use crate::proto::frame::{read_frame, write_frame};
use crate::proto::{self, CancelMsg, ResponseSummary, RowBatch, TaskMsg, WorkerRequest, WorkerResponse};

pub struct TcpMessenger {
    registry: Arc<dyn WorkerRegistry>,
    connect_timeout: Duration,
    response_timeout: Duration,
    max_frame_bytes: usize,
}

impl TcpMessenger {
    pub fn new(
        registry: Arc<dyn WorkerRegistry>,
        connect_timeout: Duration,
        response_timeout: Duration,
        max_frame_bytes: usize,
    ) -> Self {
        TcpMessenger {
            registry,
            connect_timeout,
            response_timeout,
            max_frame_bytes,
        }
    }

    /// Messenger with the frontend-configured worker response timeout.
    pub fn from_config(
        registry: Arc<dyn WorkerRegistry>,
        config: &crate::config::CzarConfig,
    ) -> Self {
        Self::new(
            registry,
            Duration::from_secs(5),
            config.worker_response_timeout(),
            crate::proto::frame::DEFAULT_MAX_FRAME_BYTES,
        )
    }

    fn connect(&self, resource: &ResourceUnit) -> Result<TcpStream> {
        let addr_text = self.registry.worker_for(resource)?;
        let addr: SocketAddr = addr_text
            .parse()
            .map_err(|_| Error::Transport(format!("bad worker address {addr_text}")))?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| Error::Transport(format!("connect to {addr}: {e}")))?;
        stream
            .set_read_timeout(Some(self.response_timeout))
            .map_err(|e| Error::Transport(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(stream)
    }
}

impl Messenger for TcpMessenger {
    fn deliver(
        &self,
        resource: &ResourceUnit,
        task: &TaskMsg,
    ) -> Result<(ResponseSummary, Vec<RowBatch>)> {
        let mut stream = self.connect(resource)?;
        let request = proto::encode(&WorkerRequest::Task(task.clone()))?;
        write_frame(&mut stream, &request).map_err(transportize)?;

        let mut batches = Vec::new();
        loop {
            let payload = read_frame(&mut stream, self.max_frame_bytes)
                .map_err(transportize)?
                .ok_or_else(|| {
                    Error::Transport("connection closed before summary".to_string())
                })?;
            match proto::decode::<WorkerResponse>(&payload)? {
                WorkerResponse::Batch(batch) => {
                    if batch.job_id != task.job_id || batch.attempt != task.attempt {
                        return Err(Error::Transport(format!(
                            "stray batch for job {} attempt {}",
                            batch.job_id, batch.attempt
                        )));
                    }
                    batches.push(batch);
                }
                WorkerResponse::Summary(summary) => {
                    debug!(
                        job_id = summary.job_id,
                        attempt = summary.attempt,
                        rows = summary.rows_sent,
                        "summary received"
                    );
                    return Ok((summary, batches));
                }
            }
        }
    }

    fn cancel(&self, resource: &ResourceUnit, msg: &CancelMsg) -> Result<()> {
        let mut stream = self.connect(resource)?;
        let request = proto::encode(&WorkerRequest::Cancel(msg.clone()))?;
        write_frame(&mut stream, &request).map_err(transportize)
    }
}

/// Frame-level IO failures are retriable transport errors.
fn transportize(e: Error) -> Error {
    match e {
        Error::Io(io) => Error::Transport(io.to_string()),
        other => other,
    }
}
