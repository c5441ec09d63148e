// Single-use transmit buffers with recycle-based backpressure.
//
// A buffer is handed to the transport, which calls `recycle()` once it no
// longer needs the bytes; the producer blocks in `wait_for_done` before
// reusing payload memory, so worker memory stays bounded by concurrent
// transmits times batch size. The buffer retains a self-reference until
// recycled, keeping it alive while the transport owns it even if the
// producing task has been cancelled; the reference drops inside `recycle()`
// and shared ownership reclaims the memory from there.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// Bytes held by all live stream buffers, for memory-pressure monitoring.
static TOTAL_BYTES: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct BufState {
    done: bool,
    cancelled: bool,
    recycled: bool,
}

pub struct StreamBuffer {
    data: Vec<u8>,
    state: Mutex<BufState>,
    cv: Condvar,
    // Self-reference held until recycle; see module docs.
    keep_alive: Mutex<Option<Arc<StreamBuffer>>>,
}

impl StreamBuffer {
    /// Wrap a payload, taking ownership of the bytes.
    pub fn create(data: Vec<u8>) -> Arc<Self> {
        TOTAL_BYTES.fetch_add(data.len(), Ordering::Relaxed);
        let buf = Arc::new(StreamBuffer {
            data,
            state: Mutex::new(BufState::default()),
            cv: Condvar::new(),
            keep_alive: Mutex::new(None),
        });
        *buf.keep_alive.lock() = Some(Arc::clone(&buf));
        buf
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes across every live buffer.
    pub fn total_bytes() -> usize {
        TOTAL_BYTES.load(Ordering::Relaxed)
    }

    /// Called by the transport when it is finished with the bytes. Exactly
    /// once per buffer; a second call is a transport bug and is ignored.
    pub fn recycle(&self) {
        {
            let mut state = self.state.lock();
            if state.recycled {
                warn!("stream buffer recycled twice");
                return;
            }
            state.recycled = true;
            state.done = true;
        }
        self.cv.notify_all();
        // Drop the self-reference outside the state lock; if nothing else
        // holds the buffer it frees here.
        let _keep_alive = self.keep_alive.lock().take();
    }

    /// Block until `recycle()` (or `cancel()`). Returns true when the
    /// transport consumed the data, false on cancellation.
    pub fn wait_for_done(&self) -> bool {
        let mut state = self.state.lock();
        while !state.done && !state.cancelled {
            self.cv.wait(&mut state);
        }
        !state.cancelled
    }

    /// Unblock any waiter without consuming the data.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock();
            state.cancelled = true;
        }
        self.cv.notify_all();
    }

    pub fn is_recycled(&self) -> bool {
        self.state.lock().recycled
    }
}

impl Drop for StreamBuffer {
    fn drop(&mut self) {
        TOTAL_BYTES.fetch_sub(self.data.len(), Ordering::Relaxed);
    }
}
