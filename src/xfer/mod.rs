// Transport implementations of the messenger contract: an in-process wiring
// for tests and single-process runs, and the TCP pair (async worker server,
// blocking frontend client) used between real processes.

pub mod client;
pub mod local;
pub mod server;

pub use client::TcpMessenger;
pub use local::LocalMessenger;
pub use server::WorkerServer;
