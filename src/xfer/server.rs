// Worker-side frame server.
//
// Accept loop on tokio; per connection, a reader task decodes request
// frames and hands tasks to the worker processor, while a writer task
// drains the outbound queue. The writer recycles each stream buffer after
// its bytes reach the socket, which is what drives the producer-side
// backpressure. Handlers stay short; all real work happens on the worker
// pool threads.

use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::proto::frame::{read_frame_async, write_frame_async};
use crate::proto::{self, ResponseSummary, WorkerRequest, WorkerResponse};
use crate::worker::send_channel::SendChannel;
use crate::worker::stream_buffer::StreamBuffer;
use crate::worker::WorkerProcessor;

enum OutMsg {
    /// A ready-encoded response frame; recycled once written.
    Batch(Arc<StreamBuffer>),
    Summary(ResponseSummary),
}

/// Send channel bridging blocking pool threads to the async writer.
struct TcpSendChannel {
    tx: mpsc::UnboundedSender<OutMsg>,
}

impl SendChannel for TcpSendChannel {
    fn send_batch(&self, buffer: Arc<StreamBuffer>, _last: bool) -> crate::error::Result<()> {
        self.tx
            .send(OutMsg::Batch(buffer))
            .map_err(|_| Error::Transport("connection writer gone".to_string()))
    }

    fn send_summary(&self, summary: ResponseSummary) -> crate::error::Result<()> {
        self.tx
            .send(OutMsg::Summary(summary))
            .map_err(|_| Error::Transport("connection writer gone".to_string()))
    }
}

pub struct WorkerServer {
    processor: Arc<WorkerProcessor>,
    cfg: TransportConfig,
}

impl WorkerServer {
    pub fn new(processor: Arc<WorkerProcessor>, cfg: TransportConfig) -> Self {
        WorkerServer { processor, cfg }
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.cfg.listen_addr).await?;
        info!(addr = %self.cfg.listen_addr, "worker server listening");
        self.serve(listener).await
    }

    /// Serve on an already-bound listener (tests bind port 0 themselves).
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            debug!(%peer, "frontend connected");
            let processor = Arc::clone(&self.processor);
            let max_frame = self.cfg.max_frame_bytes;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(processor, socket, max_frame).await {
                    warn!(%peer, error = %e, "connection failed");
                }
            });
        }
    }
}

async fn handle_connection(
    processor: Arc<WorkerProcessor>,
    socket: TcpStream,
    max_frame: usize,
) -> Result<()> {
    let (mut reader, writer) = socket.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, rx));

    while let Some(payload) = read_frame_async(&mut reader, max_frame).await? {
        match proto::decode::<WorkerRequest>(&payload)? {
            WorkerRequest::Task(task) => {
                let chan: Arc<dyn SendChannel> = Arc::new(TcpSendChannel { tx: tx.clone() });
                processor.process_task(task, chan)?;
            }
            WorkerRequest::Cancel(cancel) => {
                processor.handle_cancel(&cancel);
            }
        }
    }
    // Reader done; dropping the last sender ends the writer.
    drop(tx);
    writer_task
        .await
        .map_err(|e| Error::Transport(format!("writer task failed: {e}")))??;
    Ok(())
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<OutMsg>,
) -> Result<()> {
    let mut result: Result<()> = Ok(());
    while let Some(msg) = rx.recv().await {
        match msg {
            OutMsg::Batch(buffer) => {
                if result.is_ok() {
                    result = write_frame_async(&mut writer, buffer.data()).await;
                }
                // Done with the bytes either way; producers must not stay
                // blocked behind a dead socket.
                buffer.recycle();
            }
            OutMsg::Summary(summary) => {
                if result.is_ok() {
                    result = match proto::encode(&WorkerResponse::Summary(summary)) {
                        Ok(payload) => write_frame_async(&mut writer, &payload).await,
                        Err(e) => Err(e),
                    };
                }
            }
        }
    }
    result
}
