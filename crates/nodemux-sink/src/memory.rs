//! In-process sink built on shared byte pipes.
//!
//! A [`MemoryNetwork`] is a namespace of listener addresses. Every sink
//! created from the same network can reach the listeners bound on it, so two
//! engines in one thread (or one engine hosting both ends) can talk without a
//! kernel socket. Behaviour mirrors a stream socket: bytes are delivered in
//! order, a dropped end is seen as a hangup by the other, and
//! [`Ioctl::SendBufferSize`] caps how many bytes one `send` accepts.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;

use tracing::debug;

use crate::error::{Result, SinkError};
use crate::traits::{Ioctl, Sink, SinkMode, StreamHandle, StreamRegistry, StreamRole};

/// Name of the stock listening memory sink.
pub const MEMORY_SERVER: &str = "mem-server";
/// Name of the stock connecting memory sink.
pub const MEMORY_CLIENT: &str = "mem-client";

type Backlog = Rc<RefCell<VecDeque<Endpoint>>>;

/// Shared address space for [`MemorySink`]s.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    listeners: Rc<RefCell<HashMap<String, Backlog>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether something is listening on `addr`.
    pub fn is_bound(&self, addr: &str) -> bool {
        self.listeners.borrow().contains_key(addr)
    }

    fn bind(&self, addr: &str) -> Result<Backlog> {
        let mut listeners = self.listeners.borrow_mut();
        if listeners.contains_key(addr) {
            return Err(SinkError::AddrInUse(addr.to_string()));
        }
        let backlog = Backlog::default();
        listeners.insert(addr.to_string(), Rc::clone(&backlog));
        Ok(backlog)
    }

    fn unbind(&self, addr: &str) {
        self.listeners.borrow_mut().remove(addr);
    }

    fn connect(&self, addr: &str) -> Result<Endpoint> {
        let listeners = self.listeners.borrow();
        let backlog = listeners
            .get(addr)
            .ok_or_else(|| SinkError::ConnectionRefused(addr.to_string()))?;
        let (near, far) = Endpoint::pair();
        backlog.borrow_mut().push_back(far);
        Ok(near)
    }
}

#[derive(Default)]
struct Pipe {
    inbox: [VecDeque<u8>; 2],
    closed: [bool; 2],
}

/// One end of a bidirectional pipe. Dropping it closes that side.
struct Endpoint {
    pipe: Rc<RefCell<Pipe>>,
    side: usize,
}

impl Endpoint {
    fn pair() -> (Self, Self) {
        let pipe = Rc::new(RefCell::new(Pipe::default()));
        (
            Self {
                pipe: Rc::clone(&pipe),
                side: 0,
            },
            Self { pipe, side: 1 },
        )
    }

    fn peer(&self) -> usize {
        1 - self.side
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.pipe.borrow_mut();
        if pipe.closed[self.peer()] {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"));
        }
        let peer = self.peer();
        pipe.inbox[peer].extend(buf);
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        let mut pipe = self.pipe.borrow_mut();
        let inbox = &mut pipe.inbox[self.side];
        let n = buf.len().min(inbox.len());
        for (slot, byte) in buf.iter_mut().zip(inbox.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn drain(&self) -> Vec<u8> {
        self.pipe.borrow_mut().inbox[self.side].drain(..).collect()
    }

    fn peer_closed(&self) -> bool {
        self.pipe.borrow().closed[self.peer()]
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Ok(mut pipe) = self.pipe.try_borrow_mut() {
            pipe.closed[self.side] = true;
        }
    }
}

struct Conn {
    endpoint: Endpoint,
    send_limit: Option<usize>,
}

/// Sink over a [`MemoryNetwork`].
pub struct MemorySink {
    name: String,
    mode: SinkMode,
    network: MemoryNetwork,
    listeners: HashMap<StreamHandle, (String, Backlog)>,
    conns: HashMap<StreamHandle, Conn>,
}

impl MemorySink {
    /// Listening sink registered as `mem-server`.
    pub fn server(network: &MemoryNetwork) -> Self {
        Self::named(MEMORY_SERVER, SinkMode::Listen, network)
    }

    /// Connecting sink registered as `mem-client`.
    pub fn client(network: &MemoryNetwork) -> Self {
        Self::named(MEMORY_CLIENT, SinkMode::Connect, network)
    }

    pub fn named(name: impl Into<String>, mode: SinkMode, network: &MemoryNetwork) -> Self {
        Self {
            name: name.into(),
            mode,
            network: network.clone(),
            listeners: HashMap::new(),
            conns: HashMap::new(),
        }
    }

    fn conn(&self, handle: StreamHandle) -> Result<&Conn> {
        self.conns
            .get(&handle)
            .ok_or(SinkError::UnknownStream(handle))
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SinkMode {
        self.mode
    }

    fn open(&mut self, registry: &mut dyn StreamRegistry, addr: &str) -> Result<StreamHandle> {
        match self.mode {
            SinkMode::Listen => {
                let backlog = self.network.bind(addr)?;
                let handle = registry.register(&self.name, StreamRole::Listening, None);
                debug!(sink = %self.name, %handle, addr, "memory listener bound");
                self.listeners.insert(handle, (addr.to_string(), backlog));
                Ok(handle)
            }
            SinkMode::Connect => {
                let endpoint = self.network.connect(addr)?;
                let handle = registry.register(&self.name, StreamRole::Connected, None);
                debug!(sink = %self.name, %handle, addr, "memory pipe connected");
                self.conns.insert(
                    handle,
                    Conn {
                        endpoint,
                        send_limit: None,
                    },
                );
                Ok(handle)
            }
        }
    }

    fn close(&mut self, handle: StreamHandle) -> Result<()> {
        if self.conns.remove(&handle).is_some() {
            return Ok(());
        }
        let (addr, _backlog) = self
            .listeners
            .remove(&handle)
            .ok_or(SinkError::UnknownStream(handle))?;
        self.network.unbind(&addr);
        Ok(())
    }

    fn accept(
        &mut self,
        registry: &mut dyn StreamRegistry,
        listener: StreamHandle,
    ) -> Result<Option<StreamHandle>> {
        let (_, backlog) = self
            .listeners
            .get(&listener)
            .ok_or(SinkError::UnknownStream(listener))?;
        let Some(endpoint) = backlog.borrow_mut().pop_front() else {
            return Ok(None);
        };
        let handle = registry.register(&self.name, StreamRole::Accepted, Some(listener));
        self.conns.insert(
            handle,
            Conn {
                endpoint,
                send_limit: None,
            },
        );
        registry.accepted(listener, handle);
        Ok(Some(handle))
    }

    fn ioctl(&mut self, handle: StreamHandle, request: Ioctl) -> Result<()> {
        let conn = self
            .conns
            .get_mut(&handle)
            .ok_or(SinkError::UnknownStream(handle))?;
        match request {
            Ioctl::SendBufferSize(size) => {
                conn.send_limit = Some(size);
                Ok(())
            }
            Ioctl::Custom { .. } => Err(SinkError::Unsupported("custom ioctl")),
        }
    }

    fn send(&mut self, handle: StreamHandle, buf: &[u8]) -> Result<usize> {
        let conn = self.conn(handle)?;
        let len = conn.send_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        Ok(conn.endpoint.write(&buf[..len])?)
    }

    fn recv(&mut self, handle: StreamHandle, buf: &mut [u8]) -> Result<usize> {
        Ok(self.conn(handle)?.endpoint.read(buf))
    }

    fn writable(&self, handle: StreamHandle) -> bool {
        self.conns
            .get(&handle)
            .is_some_and(|conn| !conn.endpoint.peer_closed())
    }

    fn poll(&mut self, registry: &mut dyn StreamRegistry) -> Result<()> {
        let listeners: Vec<StreamHandle> = self.listeners.keys().copied().collect();
        for listener in listeners {
            while self.accept(registry, listener)?.is_some() {}
        }

        let mut hung = Vec::new();
        for (&handle, conn) in &self.conns {
            let data = conn.endpoint.drain();
            if !data.is_empty() {
                registry.deliver(handle, &data);
            }
            if conn.endpoint.peer_closed() {
                hung.push(handle);
            }
        }
        for handle in hung {
            self.conns.remove(&handle);
            debug!(sink = %self.name, %handle, "memory peer hung up");
            registry.hangup(handle);
        }
        Ok(())
    }
}
