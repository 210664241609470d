use std::fmt;

use crate::error::{Result, SinkError};

/// Engine-assigned identifier of one live stream.
///
/// Handles are allocated by the engine and never reused while the stream
/// they name is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(u32);

impl StreamHandle {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a stream came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    /// Bound and waiting for connections. Carries no payload bytes.
    Listening,
    /// Opened outbound by the local side.
    Connected,
    /// Created by accepting on a listening stream.
    Accepted,
}

impl StreamRole {
    /// Single-letter tag used in diagnostics.
    pub fn tag(self) -> char {
        match self {
            Self::Listening => 'l',
            Self::Connected => 'c',
            Self::Accepted => 'a',
        }
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Listening => "listening",
            Self::Connected => "connected",
            Self::Accepted => "accepted",
        };
        f.write_str(name)
    }
}

/// Whether `open` on a sink binds a listener or dials out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Listen,
    Connect,
}

/// Transport-specific configuration requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ioctl {
    /// Size the kernel (or emulated) send buffer, in bytes.
    SendBufferSize(usize),
    /// Escape hatch for sink-specific commands.
    Custom { command: u32, argument: u64 },
}

/// Stream bookkeeping the engine lends to a sink during `open`, `accept`
/// and `poll`.
pub trait StreamRegistry {
    /// Allocate a handle for a new stream owned by `sink`.
    fn register(
        &mut self,
        sink: &str,
        role: StreamRole,
        parent: Option<StreamHandle>,
    ) -> StreamHandle;

    /// Append bytes that arrived on `handle` to its receive buffer.
    fn deliver(&mut self, handle: StreamHandle, data: &[u8]);

    /// Report that `listener` produced the accepted stream `handle`.
    fn accepted(&mut self, listener: StreamHandle, handle: StreamHandle);

    /// Report that the peer of `handle` went away. The sink has already
    /// released its own resources for the stream.
    fn hangup(&mut self, handle: StreamHandle);
}

/// A named transport backend.
///
/// All operations are non-blocking. `send` and `recv` return `Ok(0)` when
/// the transport cannot make progress right now; end-of-stream is reported
/// through [`StreamRegistry::hangup`] during [`Sink::poll`].
pub trait Sink {
    /// Unique name the engine uses to pick this sink.
    fn name(&self) -> &str;

    fn mode(&self) -> SinkMode;

    /// Bind or connect to `addr`, registering the new stream.
    fn open(&mut self, registry: &mut dyn StreamRegistry, addr: &str) -> Result<StreamHandle>;

    /// Release the transport resources behind `handle`.
    fn close(&mut self, handle: StreamHandle) -> Result<()>;

    /// Accept one pending connection on `listener`, if any.
    fn accept(
        &mut self,
        registry: &mut dyn StreamRegistry,
        listener: StreamHandle,
    ) -> Result<Option<StreamHandle>>;

    fn ioctl(&mut self, handle: StreamHandle, request: Ioctl) -> Result<()> {
        let _ = (handle, request);
        Err(SinkError::Unsupported("ioctl"))
    }

    /// Write as much of `buf` as the transport accepts right now.
    fn send(&mut self, handle: StreamHandle, buf: &[u8]) -> Result<usize>;

    /// Read whatever is immediately available into `buf`.
    fn recv(&mut self, handle: StreamHandle, buf: &mut [u8]) -> Result<usize>;

    /// Whether a `send` on `handle` would make progress.
    fn writable(&self, handle: StreamHandle) -> bool;

    /// Observe every stream this sink owns: accept pending connections,
    /// deliver readable bytes and report hangups.
    fn poll(&mut self, registry: &mut dyn StreamRegistry) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_display_and_ordering() {
        let a = StreamHandle::new(3);
        let b = StreamHandle::new(7);
        assert_eq!(a.to_string(), "#3");
        assert!(a < b);
        assert_eq!(b.get(), 7);
    }

    #[test]
    fn role_tags() {
        assert_eq!(StreamRole::Listening.tag(), 'l');
        assert_eq!(StreamRole::Connected.tag(), 'c');
        assert_eq!(StreamRole::Accepted.tag(), 'a');
        assert_eq!(StreamRole::Accepted.to_string(), "accepted");
    }
}
