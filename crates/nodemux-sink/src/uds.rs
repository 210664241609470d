use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, SinkError};
use crate::fd::{poll_writable, set_send_buffer};
use crate::traits::{Ioctl, Sink, SinkMode, StreamHandle, StreamRegistry, StreamRole};

/// Name of the stock listening Unix socket sink.
pub const UNIX_SERVER: &str = "unix-server";
/// Name of the stock connecting Unix socket sink.
pub const UNIX_CLIENT: &str = "unix-client";

const READ_CHUNK: usize = 8 * 1024;

/// Non-blocking Unix domain socket sink.
///
/// A sink is either a listener factory ([`UnixSink::server`]) or a dialer
/// ([`UnixSink::client`]). Listening sockets are created at a filesystem path
/// with mode `0o600` by default; stale sockets at that path are replaced and
/// the path is removed again when the listener closes, as long as the inode
/// still belongs to us.
pub struct UnixSink {
    name: String,
    mode: SinkMode,
    socket_mode: u32,
    listeners: HashMap<StreamHandle, BoundSocket>,
    conns: HashMap<StreamHandle, UnixStream>,
}

struct BoundSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        match std::fs::symlink_metadata(&self.path) {
            Ok(metadata)
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino =>
            {
                debug!(path = ?self.path, "removing socket file");
                let _ = std::fs::remove_file(&self.path);
            }
            Ok(_) => debug!(path = ?self.path, "socket path replaced, leaving it alone"),
            Err(_) => {}
        }
    }
}

impl UnixSink {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Listening sink registered as `unix-server`.
    pub fn server() -> Self {
        Self::named(UNIX_SERVER, SinkMode::Listen)
    }

    /// Connecting sink registered as `unix-client`.
    pub fn client() -> Self {
        Self::named(UNIX_CLIENT, SinkMode::Connect)
    }

    /// A sink with a custom name, for hosting several of one kind.
    pub fn named(name: impl Into<String>, mode: SinkMode) -> Self {
        Self {
            name: name.into(),
            mode,
            socket_mode: Self::DEFAULT_SOCKET_MODE,
            listeners: HashMap::new(),
            conns: HashMap::new(),
        }
    }

    /// Override the permission bits applied to new socket paths.
    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    /// Filesystem path of a listening stream.
    pub fn local_path(&self, handle: StreamHandle) -> Option<&Path> {
        self.listeners.get(&handle).map(|b| b.path.as_path())
    }

    fn bind(&self, path: &Path) -> Result<BoundSocket> {
        let bind_err = |source| SinkError::Bind {
            addr: path.display().to_string(),
            source,
        };

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(SinkError::PathTooLong {
                path: path.to_path_buf(),
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Only ever remove a stale socket, never a regular file.
        if let Ok(metadata) = std::fs::symlink_metadata(path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            if UnixStream::connect(path).is_ok() {
                return Err(SinkError::AddrInUse(path.display().to_string()));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(path).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.socket_mode))
            .map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(path).map_err(bind_err)?;

        Ok(BoundSocket {
            listener,
            path: path.to_path_buf(),
            created_inode: (metadata.dev(), metadata.ino()),
        })
    }

    fn connect(path: &Path) -> Result<UnixStream> {
        let stream = UnixStream::connect(path).map_err(|source| match source.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::NotFound => {
                SinkError::ConnectionRefused(path.display().to_string())
            }
            _ => SinkError::Connect {
                addr: path.display().to_string(),
                source,
            },
        })?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }

    fn fd_of(&self, handle: StreamHandle) -> Result<RawFd> {
        if let Some(stream) = self.conns.get(&handle) {
            return Ok(stream.as_raw_fd());
        }
        self.listeners
            .get(&handle)
            .map(|b| b.listener.as_raw_fd())
            .ok_or(SinkError::UnknownStream(handle))
    }

    fn conn(&mut self, handle: StreamHandle) -> Result<&mut UnixStream> {
        self.conns
            .get_mut(&handle)
            .ok_or(SinkError::UnknownStream(handle))
    }
}

impl Sink for UnixSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SinkMode {
        self.mode
    }

    fn open(&mut self, registry: &mut dyn StreamRegistry, addr: &str) -> Result<StreamHandle> {
        let path = Path::new(addr);
        match self.mode {
            SinkMode::Listen => {
                let bound = self.bind(path)?;
                let handle = registry.register(&self.name, StreamRole::Listening, None);
                info!(sink = %self.name, %handle, ?path, "listening on unix domain socket");
                self.listeners.insert(handle, bound);
                Ok(handle)
            }
            SinkMode::Connect => {
                let stream = Self::connect(path)?;
                let handle = registry.register(&self.name, StreamRole::Connected, None);
                debug!(sink = %self.name, %handle, ?path, "connected to unix domain socket");
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
        let stream = match bound.listener.accept() {
            Ok((stream, _addr)) => stream,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(err) => return Err(SinkError::Accept(err)),
        };
        stream.set_nonblocking(true).map_err(SinkError::Accept)?;

        let handle = registry.register(&self.name, StreamRole::Accepted, Some(listener));
        debug!(sink = %self.name, %listener, %handle, "accepted connection");
        self.conns.insert(handle, stream);
        registry.accepted(listener, handle);
        Ok(Some(handle))
    }

    fn ioctl(&mut self, handle: StreamHandle, request: Ioctl) -> Result<()> {
        match request {
            Ioctl::SendBufferSize(size) => {
                set_send_buffer(self.fd_of(handle)?, size)?;
                debug!(%handle, size, "send buffer resized");
                Ok(())
            }
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

    fn writable(&self, handle: StreamHandle) -> bool {
        self.conns
            .get(&handle)
            .is_some_and(|stream| poll_writable(stream.as_raw_fd()))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRegistry;

    fn socket_path(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        PathBuf::from(format!("/tmp/nm-{}-{nanos}-{tag}.sock", std::process::id()))
    }

    fn pump(server: &mut UnixSink, registry: &mut RecordingRegistry, rounds: usize) {
        for _ in 0..rounds {
            server.poll(registry).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    #[test]
    fn bind_rejects_long_path() {
        let mut sink = UnixSink::server();
        let mut registry = RecordingRegistry::default();
        let long = format!("/tmp/{}", "x".repeat(200));
        let err = sink.open(&mut registry, &long).unwrap_err();
        assert!(matches!(err, SinkError::PathTooLong { .. }));
    }

    #[test]
    fn bind_refuses_regular_file() {
        let path = socket_path("regular");
        std::fs::write(&path, b"not a socket").unwrap();
        let mut sink = UnixSink::server();
        let mut registry = RecordingRegistry::default();
        let err = sink
            .open(&mut registry, path.to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, SinkError::Bind { .. }));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn connect_to_missing_path_is_refused() {
        let mut sink = UnixSink::client();
        let mut registry = RecordingRegistry::default();
        let path = socket_path("missing");
        let err = sink
            .open(&mut registry, path.to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, SinkError::ConnectionRefused(_)));
    }

    #[test]
    fn accept_deliver_and_hangup() {
        let path = socket_path("roundtrip");
        let addr = path.to_str().unwrap().to_string();
        let mut server = UnixSink::server();
        let mut client = UnixSink::client();
        let mut server_reg = RecordingRegistry::default();
        let mut client_reg = RecordingRegistry::default();

        let listener = server.open(&mut server_reg, &addr).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(server.local_path(listener), Some(path.as_path()));

        let conn = client.open(&mut client_reg, &addr).unwrap();
        pump(&mut server, &mut server_reg, 2);
        assert_eq!(server_reg.accepted.len(), 1);
        let (l, accepted) = server_reg.accepted[0];
        assert_eq!(l, listener);
        assert_eq!(
            server_reg.roles[&accepted],
            (StreamRole::Accepted, Some(listener))
        );

        assert!(client.writable(conn));
        assert_eq!(client.send(conn, b"ping").unwrap(), 4);
        pump(&mut server, &mut server_reg, 2);
        assert_eq!(server_reg.received[&accepted], b"ping");

        client.close(conn).unwrap();
        pump(&mut server, &mut server_reg, 2);
        assert_eq!(server_reg.hangups, vec![accepted]);

        server.close(listener).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn send_buffer_ioctl() {
        let path = socket_path("ioctl");
        let addr = path.to_str().unwrap().to_string();
        let mut server = UnixSink::server();
        let mut client = UnixSink::client();
        let mut registry = RecordingRegistry::default();
        let _listener = server.open(&mut registry, &addr).unwrap();
        let conn = client.open(&mut registry, &addr).unwrap();

        client.ioctl(conn, Ioctl::SendBufferSize(64 * 1024)).unwrap();
        let err = client
            .ioctl(conn, Ioctl::Custom { command: 1, argument: 0 })
            .unwrap_err();
        assert!(matches!(err, SinkError::Unsupported(_)));
        let err = client
            .ioctl(StreamHandle::new(999), Ioctl::SendBufferSize(1))
            .unwrap_err();
        assert!(matches!(err, SinkError::UnknownStream(_)));
    }
}
