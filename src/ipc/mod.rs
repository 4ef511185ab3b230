//! TCP+msgpack IPC transport layer.
//!
//! Every TCP connection becomes one peer of a `LocalBus`: its requests are bus
//! method calls and signals addressed to it are pushed back as frames.

pub mod codec;
pub mod server;

pub use server::IpcServer;
