//! Transport capability contract for nodemux.
//!
//! A [`Sink`] is a named transport backend. The engine never touches platform
//! I/O itself; it opens, closes, configures, writes, reads and polls streams
//! only through this trait. Sinks report what they observe (new connections,
//! arrived bytes, hangups) back through a [`StreamRegistry`] the engine hands
//! them for the duration of each call.
//!
//! Three bindings ship with the crate:
//! - [`UnixSink`]: non-blocking Unix domain sockets
//! - [`TcpSink`]: non-blocking TCP sockets
//! - [`MemorySink`]: in-process byte pipes, handy for tests and embedding

pub mod error;
pub mod memory;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
mod fd;

#[cfg(unix)]
pub mod uds;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, SinkError};
pub use memory::{MemoryNetwork, MemorySink, MEMORY_CLIENT, MEMORY_SERVER};
pub use tcp::{TcpSink, TCP_CLIENT, TCP_SERVER};
pub use traits::{Ioctl, Sink, SinkMode, StreamHandle, StreamRegistry, StreamRole};

#[cfg(unix)]
pub use uds::{UnixSink, UNIX_CLIENT, UNIX_SERVER};
