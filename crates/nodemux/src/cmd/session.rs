use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use nodemux_engine::{Disposition, Engine, Packet, StreamHandle};
use nodemux_sink::{UnixSink, UNIX_CLIENT};
use tracing::{debug, info};

use crate::cmd::socket_addr;
use crate::exit::{engine_error, CliError, CliResult, FAILURE, TIMEOUT};
use crate::output::node_id;

const TICK: Duration = Duration::from_millis(5);

/// A one-stream client engine connected to a hub.
pub struct ClientSession {
    engine: Engine,
    stream: StreamHandle,
    inbox: Rc<RefCell<VecDeque<Packet>>>,
    closed: Rc<Cell<bool>>,
}

impl ClientSession {
    pub fn connect(path: &Path, node: u32) -> CliResult<Self> {
        let mut engine = Engine::new();
        engine
            .register_sink(Box::new(UnixSink::client()))
            .map_err(|err| engine_error("sink setup failed", err))?;
        let stream = engine
            .open(UNIX_CLIENT, socket_addr(path)?)
            .map_err(|err| engine_error("connect failed", err))?;
        engine
            .enable_protocol(stream, node)
            .map_err(|err| engine_error("protocol setup failed", err))?;

        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        let seen = Rc::clone(&inbox);
        engine
            .on_packet(stream, move |_, _, packet| {
                seen.borrow_mut().push_back(packet.clone());
                Disposition::Finished
            })
            .map_err(|err| engine_error("handler setup failed", err))?;

        let closed = Rc::new(Cell::new(false));
        let flag = Rc::clone(&closed);
        engine
            .on_close(stream, move |_, _| flag.set(true))
            .map_err(|err| engine_error("handler setup failed", err))?;

        Ok(Self {
            engine,
            stream,
            inbox,
            closed,
        })
    }

    /// Poll until the hub has announced its id.
    pub fn wait_sync(&mut self, timeout: Duration) -> CliResult<u32> {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick()?;
            let hub = self.hub_id();
            if hub != 0 {
                info!(hub = %node_id(hub), "synchronized with hub");
                return Ok(hub);
            }
            if Instant::now() >= deadline {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no handshake from hub within {timeout:?}"),
                ));
            }
        }
    }

    pub fn send(&mut self, packet: &Packet) -> CliResult<()> {
        self.engine
            .send_packet(self.stream, packet)
            .map_err(|err| engine_error("send failed", err))
    }

    /// Poll until a received packet satisfies `accept`, leaving the rest
    /// queued.
    pub fn wait_for<F>(&mut self, timeout: Duration, mut accept: F) -> CliResult<Packet>
    where
        F: FnMut(&Packet) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let hit = {
                let mut inbox = self.inbox.borrow_mut();
                let found = inbox.iter().position(|p| accept(p));
                found.and_then(|i| inbox.remove(i))
            };
            if let Some(packet) = hit {
                return Ok(packet);
            }
            if Instant::now() >= deadline {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply within {timeout:?}"),
                ));
            }
            self.tick()?;
        }
    }

    /// Next received packet, if one arrives within `timeout`.
    pub fn next(&mut self, timeout: Duration) -> CliResult<Option<Packet>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(packet) = self.inbox.borrow_mut().pop_front() {
                return Ok(Some(packet));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.tick()?;
        }
    }

    /// Poll until everything queued has been handed to the socket.
    pub fn flush(&mut self, timeout: Duration) -> CliResult<()> {
        let deadline = Instant::now() + timeout;
        while self
            .engine
            .stream(self.stream)
            .is_some_and(|s| !s.queued().is_empty())
        {
            if Instant::now() >= deadline {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("could not flush within {timeout:?}"),
                ));
            }
            self.tick()?;
        }
        Ok(())
    }

    pub fn hub_id(&self) -> u32 {
        self.engine
            .stream(self.stream)
            .map_or(0, |s| s.remote_id())
    }

    fn tick(&mut self) -> CliResult<()> {
        self.engine.poll(Some(TICK));
        if self.closed.get() && self.inbox.borrow().is_empty() {
            debug!("hub stream closed");
            return Err(CliError::new(FAILURE, "hub closed the connection"));
        }
        Ok(())
    }
}
