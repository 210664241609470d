use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info, warn};

use crate::error::{Result, SinkError};
use crate::traits::{Ioctl, Sink, SinkMode, StreamHandle, StreamRegistry, StreamRole};

/// Name of the stock listening TCP sink.
pub const TCP_SERVER: &str = "tcp-server";
/// Name of the stock connecting TCP sink.
pub const TCP_CLIENT: &str = "tcp-client";

const READ_CHUNK: usize = 8 * 1024;

/// Non-blocking TCP sink.
///
/// Addresses are anything [`std::net::ToSocketAddrs`] accepts for a string,
/// e.g. `127.0.0.1:7000` or `localhost:7000`. Binding port 0 picks a free
/// port; [`TcpSink::local_addr`] reports which one. Connections are opened
/// with `TCP_NODELAY` since packets are small and latency-bound.
pub struct TcpSink {
    name: String,
    mode: SinkMode,
    listeners: HashMap<StreamHandle, TcpListener>,
    conns: HashMap<StreamHandle, TcpStream>,
}

impl TcpSink {
    /// Listening sink registered as `tcp-server`.
    pub fn server() -> Self {
        Self::named(TCP_SERVER, SinkMode::Listen)
    }

    /// Connecting sink registered as `tcp-client`.
    pub fn client() -> Self {
        Self::named(TCP_CLIENT, SinkMode::Connect)
    }

    pub fn named(name: impl Into<String>, mode: SinkMode) -> Self {
        Self {
            name: name.into(),
            mode,
            listeners: HashMap::new(),
            conns: HashMap::new(),
        }
    }

    /// Bound address of a listening stream.
    pub fn local_addr(&self, handle: StreamHandle) -> Option<SocketAddr> {
        self.listeners
            .get(&handle)
            .and_then(|listener| listener.local_addr().ok())
    }

    fn bind(addr: &str) -> Result<TcpListener> {
        let bind_err = |source: std::io::Error| match source.kind() {
            ErrorKind::AddrInUse => SinkError::AddrInUse(addr.to_string()),
            _ => SinkError::Bind {
                addr: addr.to_string(),
                source,
            },
        };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        Ok(listener)
    }

    fn connect(addr: &str) -> Result<TcpStream> {
        let stream = TcpStream::connect(addr).map_err(|source| match source.kind() {
            ErrorKind::ConnectionRefused => SinkError::ConnectionRefused(addr.to_string()),
            _ => SinkError::Connect {
                addr: addr.to_string(),
                source,
            },
        })?;
        Self::prepare(&stream)?;
        Ok(stream)
    }

    fn prepare(stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)
    }

    fn conn(&mut self, handle: StreamHandle) -> Result<&mut TcpStream> {
        self.conns
            .get_mut(&handle)
            .ok_or(SinkError::UnknownStream(handle))
    }

    #[cfg(unix)]
    fn fd_of(&self, handle: StreamHandle) -> Result<std::os::fd::RawFd> {
        use std::os::fd::AsRawFd;

        if let Some(stream) = self.conns.get(&handle) {
            return Ok(stream.as_raw_fd());
        }
        self.listeners
            .get(&handle)
            .map(AsRawFd::as_raw_fd)
            .ok_or(SinkError::UnknownStream(handle))
    }
}

impl Sink for TcpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SinkMode {
        self.mode
    }

    fn open(&mut self, registry: &mut dyn StreamRegistry, addr: &str) -> Result<StreamHandle> {
        match self.mode {
            SinkMode::Listen => {
                let listener = Self::bind(addr)?;
                let handle = registry.register(&self.name, StreamRole::Listening, None);
                info!(sink = %self.name, %handle, local = ?listener.local_addr().ok(), "listening on tcp");
                self.listeners.insert(handle, listener);
                Ok(handle)
            }
            SinkMode::Connect => {
                let stream = Self::connect(addr)?;
                let handle = registry.register(&self.name, StreamRole::Connected, None);
                debug!(sink = %self.name, %handle, addr, "connected over tcp");
                self.conns.insert(handle, stream);
                Ok(handle)
            }
        }
    }

    fn close(&mut self, handle: StreamHandle) -> Result<()> {
        if let Some(stream) = self.conns.remove(&handle) {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            return Ok(());
        }
        self.listeners
            .remove(&handle)
            .map(drop)
            .ok_or(SinkError::UnknownStream(handle))
    }

    fn accept(
        &mut self,
        registry: &mut dyn StreamRegistry,
        listener: StreamHandle,
    ) -> Result<Option<StreamHandle>> {
        let bound = self
            .listeners
            .get(&listener)
            .ok_or(SinkError::UnknownStream(listener))?;
        let (stream, peer) = match bound.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(err) => return Err(SinkError::Accept(err)),
        };
        Self::prepare(&stream).map_err(SinkError::Accept)?;

        let handle = registry.register(&self.name, StreamRole::Accepted, Some(listener));
        debug!(sink = %self.name, %listener, %handle, %peer, "accepted connection");
        self.conns.insert(handle, stream);
        registry.accepted(listener, handle);
        Ok(Some(handle))
    }

    fn ioctl(&mut self, handle: StreamHandle, request: Ioctl) -> Result<()> {
        match request {
            #[cfg(unix)]
            Ioctl::SendBufferSize(size) => {
                crate::fd::set_send_buffer(self.fd_of(handle)?, size)?;
                debug!(%handle, size, "send buffer resized");
                Ok(())
            }
            #[cfg(not(unix))]
            Ioctl::SendBufferSize(_) => Err(SinkError::Unsupported("send buffer size")),
            Ioctl::Custom { .. } => Err(SinkError::Unsupported("custom ioctl")),
        }
    }

    fn send(&mut self, handle: StreamHandle, buf: &[u8]) -> Result<usize> {
        let stream = self.conn(handle)?;
        loop {
            match stream.write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) => return Err(SinkError::Io(err)),
            }
        }
    }

    fn recv(&mut self, handle: StreamHandle, buf: &mut [u8]) -> Result<usize> {
        let stream = self.conn(handle)?;
        loop {
            match stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) => return Err(SinkError::Io(err)),
            }
        }
    }

    #[cfg(unix)]
    fn writable(&self, handle: StreamHandle) -> bool {
        use std::os::fd::AsRawFd;

        self.conns
            .get(&handle)
            .is_some_and(|stream| crate::fd::poll_writable(stream.as_raw_fd()))
    }

    // Without poll(2) a short `send` is the only backpressure signal.
    #[cfg(not(unix))]
    fn writable(&self, handle: StreamHandle) -> bool {
        self.conns.contains_key(&handle)
    }

    fn poll(&mut self, registry: &mut dyn StreamRegistry) -> Result<()> {
        let mut failure = None;

        let listeners: Vec<StreamHandle> = self.listeners.keys().copied().collect();
        for listener in listeners {
            loop {
                match self.accept(registry, listener) {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(err) => {
                        failure.get_or_insert(err);
                        break;
                    }
                }
            }
        }

        let mut hung = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        for (&handle, stream) in self.conns.iter_mut() {
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => {
                        hung.push(handle);
                        break;
                    }
                    Ok(n) => registry.deliver(handle, &chunk[..n]),
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(err) => {
                        warn!(sink = %self.name, %handle, error = %err, "read failed, dropping connection");
                        hung.push(handle);
                        break;
                    }
                }
            }
        }

        for handle in hung {
            self.conns.remove(&handle);
            debug!(sink = %self.name, %handle, "peer hung up");
            registry.hangup(handle);
        }

        failure.map_or(Ok(()), Err)
    }
}
