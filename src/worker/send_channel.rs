// Result send channels.
//
// A task never talks to the transport directly: it hands serialized batches
// to a `SendChannel`. `ChannelStream` queues buffers for a pulling transport
// (which recycles each buffer as it consumes it); `CollectingSendChannel`
// is the in-process endpoint that decodes everything back for the local
// messenger and tests.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::proto::{self, ResponseSummary, RowBatch, WorkerResponse};
use crate::worker::stream_buffer::StreamBuffer;

pub trait SendChannel: Send + Sync {
    /// Hand one serialized `RowBatch` to the transport. The transport owns
    /// the buffer until it calls `recycle()`.
    fn send_batch(&self, buffer: Arc<StreamBuffer>, last: bool) -> Result<()>;

    /// Report the terminal summary for the task attempt.
    fn send_summary(&self, summary: ResponseSummary) -> Result<()>;
}

// ---------------------------------------------------------------------------

/// Buffer queue between a producing task and a pulling transport.
pub struct ChannelStream {
    state: Mutex<StreamState>,
    has_data: Condvar,
}

struct StreamState {
    msgs: VecDeque<(Arc<StreamBuffer>, bool)>,
    summary: Option<ResponseSummary>,
    closed: bool,
}

impl ChannelStream {
    pub fn new() -> Arc<Self> {
        Arc::new(ChannelStream {
            state: Mutex::new(StreamState {
                msgs: VecDeque::new(),
                summary: None,
                closed: false,
            }),
            has_data: Condvar::new(),
        })
    }

    /// Pull the next buffer; blocks until data arrives or the stream closes.
    /// The caller must recycle the buffer when done with it.
    pub fn get_buff(&self) -> Option<(Arc<StreamBuffer>, bool)> {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.msgs.pop_front() {
                return Some(entry);
            }
            if state.closed {
                return None;
            }
            self.has_data.wait(&mut state);
        }
    }

    /// The summary, once the stream has closed.
    pub fn take_summary(&self) -> Option<ResponseSummary> {
        self.state.lock().summary.take()
    }

    pub fn closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl SendChannel for ChannelStream {
    fn send_batch(&self, buffer: Arc<StreamBuffer>, last: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Transport("send on closed channel stream".to_string()));
        }
        state.msgs.push_back((buffer, last));
        drop(state);
        self.has_data.notify_all();
        Ok(())
    }

    fn send_summary(&self, summary: ResponseSummary) -> Result<()> {
        let mut state = self.state.lock();
        state.summary = Some(summary);
        state.closed = true;
        drop(state);
        self.has_data.notify_all();
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// In-process endpoint: decodes batches as the transport would, recycling
/// each buffer immediately, and lets a caller block for the final outcome.
pub struct CollectingSendChannel {
    state: Mutex<CollectState>,
    done: Condvar,
}

#[derive(Default)]
struct CollectState {
    batches: Vec<RowBatch>,
    summary: Option<ResponseSummary>,
}

impl CollectingSendChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(CollectingSendChannel {
            state: Mutex::new(CollectState::default()),
            done: Condvar::new(),
        })
    }

    /// Block until the summary lands, then return it with the batches.
    pub fn wait(&self) -> (ResponseSummary, Vec<RowBatch>) {
        let mut state = self.state.lock();
        loop {
            if let Some(summary) = state.summary.clone() {
                return (summary, std::mem::take(&mut state.batches));
            }
            self.done.wait(&mut state);
        }
    }
}

impl SendChannel for CollectingSendChannel {
    fn send_batch(&self, buffer: Arc<StreamBuffer>, _last: bool) -> Result<()> {
        let frame: WorkerResponse = proto::decode(buffer.data())?;
        // This endpoint is the transport; it is done with the bytes now.
        buffer.recycle();
        match frame {
            WorkerResponse::Batch(batch) => {
                self.state.lock().batches.push(batch);
                Ok(())
            }
            WorkerResponse::Summary(_) => Err(Error::Transport(
                "summary frame on the batch path".to_string(),
            )),
        }
    }

    fn send_summary(&self, summary: ResponseSummary) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.summary = Some(summary);
        }
        self.done.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::ResponseStatus;

    fn summary(rows: u64) -> ResponseSummary {
        ResponseSummary {
            query_id: 1,
            job_id: 1,
            attempt: 1,
            status: ResponseStatus::Success,
            rows_sent: rows,
            columns: vec!["a".to_string()],
            error_code: None,
            error_msg: None,
        }
    }

    #[test]
    fn channel_stream_delivers_in_order() {
        let stream = ChannelStream::new();
        let b1 = StreamBuffer::create(vec![1]);
        let b2 = StreamBuffer::create(vec![2]);
        stream.send_batch(Arc::clone(&b1), false).unwrap();
        stream.send_batch(Arc::clone(&b2), true).unwrap();
        stream.send_summary(summary(2)).unwrap();
        let (got1, last1) = stream.get_buff().unwrap();
        assert_eq!(got1.data(), &[1]);
        assert!(!last1);
        got1.recycle();
        let (got2, last2) = stream.get_buff().unwrap();
        assert!(last2);
        got2.recycle();
        assert!(stream.get_buff().is_none());
        assert_eq!(stream.take_summary().unwrap().rows_sent, 2);
        b1.wait_for_done();
        b2.wait_for_done();
    }

    #[test]
    fn send_after_close_fails() {
        let stream = ChannelStream::new();
        stream.send_summary(summary(0)).unwrap();
        let buf = StreamBuffer::create(vec![0]);
        assert!(stream.send_batch(Arc::clone(&buf), true).is_err());
        buf.recycle();
    }

    #[test]
    fn collecting_channel_decodes_and_recycles() {
        let chan = CollectingSendChannel::new();
        let batch = RowBatch {
            query_id: 1,
            job_id: 1,
            attempt: 1,
            last: true,
            rows: vec![vec![crate::rowstore::Value::Int(3)]],
        };
        let buf = StreamBuffer::create(proto::encode(&WorkerResponse::Batch(batch)).unwrap());
        chan.send_batch(Arc::clone(&buf), true).unwrap();
        assert!(buf.is_recycled());
        chan.send_summary(summary(1)).unwrap();
        let (sum, batches) = chan.wait();
        assert_eq!(sum.rows_sent, 1);
        assert_eq!(batches.len(), 1);
    }
}
