// Worker side: tasks, the processor that schedules and runs them, and the
// buffer/channel plumbing that streams result bytes back to the frontend.

pub mod processor;
pub mod send_channel;
pub mod stream_buffer;
pub mod task;

pub use processor::WorkerProcessor;
pub use send_channel::{ChannelStream, CollectingSendChannel, SendChannel};
pub use stream_buffer::StreamBuffer;
pub use task::Task;
