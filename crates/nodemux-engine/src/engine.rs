use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use nodemux_frame::{control, Packet};
use nodemux_sink::{Ioctl, Sink, StreamHandle, StreamRegistry, StreamRole};
use tracing::{debug, info, trace, warn};

use crate::callback::{
    invoke, AcceptCallback, CloseCallback, Disposition, PacketCallback, PollinCallback,
};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::message::PendingMessage;
use crate::stream::{HandshakeState, Stream, StreamTable};

/// Something a sink reported during `open`/`poll` that the engine acts on
/// once the sink call has returned.
#[derive(Debug)]
enum SinkEvent {
    Accepted {
        listener: StreamHandle,
        handle: StreamHandle,
    },
    Hangup(StreamHandle),
}

/// The view of the engine a sink gets while it runs.
struct SinkContext<'a> {
    streams: &'a mut StreamTable,
    events: &'a mut Vec<SinkEvent>,
    now: Instant,
}

impl StreamRegistry for SinkContext<'_> {
    fn register(
        &mut self,
        sink: &str,
        role: StreamRole,
        parent: Option<StreamHandle>,
    ) -> StreamHandle {
        let handle = self.streams.insert(sink, role, parent);
        info!(stream = %handle, sink, %role, ?parent, "stream opened");
        handle
    }

    fn deliver(&mut self, handle: StreamHandle, data: &[u8]) {
        match self.streams.get_mut(handle) {
            Some(stream) => {
                trace!(stream = %handle, len = data.len(), "bytes arrived");
                stream.rx.extend(data, self.now);
                stream.rx_fresh = true;
            }
            None => debug!(stream = %handle, "bytes for unknown stream dropped"),
        }
    }

    fn accepted(&mut self, listener: StreamHandle, handle: StreamHandle) {
        self.events.push(SinkEvent::Accepted { listener, handle });
    }

    fn hangup(&mut self, handle: StreamHandle) {
        self.events.push(SinkEvent::Hangup(handle));
    }
}

/// Single-threaded I/O multiplexer.
///
/// Owns the registered sinks, every live stream and the queue of packets
/// waiting to be routed. Drive it by calling [`poll`](Self::poll) in a loop;
/// everything else (callbacks included) happens inside those calls.
///
/// ```no_run
/// use nodemux_engine::{Disposition, Engine};
/// use nodemux_sink::UnixSink;
///
/// let mut engine = Engine::new();
/// engine.register_sink(Box::new(UnixSink::server()))?;
/// let hub = engine.open("unix-server", "/tmp/hub.sock")?;
/// engine.enable_protocol(hub, 0x8888)?;
/// engine.on_accept(hub, |engine, _, conn| {
///     let _ = engine.on_packet(conn, |_, _, _| Disposition::Forward);
/// })?;
/// loop {
///     engine.poll(None);
/// }
/// # Ok::<(), nodemux_engine::EngineError>(())
/// ```
pub struct Engine {
    config: EngineConfig,
    sinks: Vec<Box<dyn Sink>>,
    pub(crate) streams: StreamTable,
    pub(crate) pending: VecDeque<PendingMessage>,
    events: Vec<SinkEvent>,
    hangups: Vec<StreamHandle>,
    last_poll: Option<Instant>,
    activity: usize,
    idle: Duration,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            streams: StreamTable::new(config.frame.clone()),
            config,
            sinks: Vec::new(),
            pending: VecDeque::new(),
            events: Vec::new(),
            hangups: Vec::new(),
            last_poll: None,
            activity: 0,
            idle: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- sinks ---

    /// Add a transport. Names must be unique.
    pub fn register_sink(&mut self, sink: Box<dyn Sink>) -> Result<()> {
        if self.sinks.iter().any(|s| s.name() == sink.name()) {
            return Err(EngineError::DuplicateSink(sink.name().to_string()));
        }
        info!(sink = sink.name(), "sink registered");
        self.sinks.push(sink);
        Ok(())
    }

    /// Detach a transport and hand it back. Its streams stay in the table;
    /// close them first.
    pub fn unregister_sink(&mut self, name: &str) -> Result<Box<dyn Sink>> {
        let index = self
            .sinks
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| EngineError::SinkNotFound(name.to_string()))?;
        info!(sink = name, "sink unregistered");
        Ok(self.sinks.remove(index))
    }

    /// Names of the registered sinks.
    pub fn sinks(&self) -> impl Iterator<Item = &str> {
        self.sinks.iter().map(|s| s.name())
    }

    fn sink_of(&mut self, handle: StreamHandle) -> Result<&mut Box<dyn Sink>> {
        let stream = self
            .streams
            .get(handle)
            .ok_or(EngineError::StreamNotFound(handle))?;
        let name = stream.sink_name();
        match self.sinks.iter_mut().find(|s| s.name() == name) {
            Some(sink) => Ok(sink),
            None => Err(EngineError::SinkNotFound(name.to_string())),
        }
    }

    // --- streams ---

    /// Listen on or connect to `addr` through the named sink.
    pub fn open(&mut self, sink_name: &str, addr: &str) -> Result<StreamHandle> {
        let now = Instant::now();
        let Self {
            sinks,
            streams,
            events,
            ..
        } = self;
        let sink = sinks
            .iter_mut()
            .find(|s| s.name() == sink_name)
            .ok_or_else(|| EngineError::SinkNotFound(sink_name.to_string()))?;
        let mut ctx = SinkContext {
            streams,
            events,
            now,
        };
        Ok(sink.open(&mut ctx, addr)?)
    }

    /// Close the transport and destroy the stream. The close callback runs
    /// exactly once; closing again from inside it is a no-op.
    pub fn close(&mut self, handle: StreamHandle) -> Result<()> {
        let stream = self
            .streams
            .get(handle)
            .ok_or(EngineError::StreamNotFound(handle))?;
        if stream.closing {
            return Ok(());
        }
        match self.sink_of(handle) {
            Ok(sink) => {
                if let Err(err) = sink.close(handle) {
                    debug!(stream = %handle, error = %err, "transport close failed");
                }
            }
            Err(err) => debug!(stream = %handle, error = %err, "closing stream without sink"),
        }
        self.destroy_stream(handle);
        Ok(())
    }

    pub(crate) fn destroy_stream(&mut self, handle: StreamHandle) {
        let Some(stream) = self.streams.get_mut(handle) else {
            return;
        };
        if stream.closing {
            return;
        }
        stream.closing = true;
        stream.state = HandshakeState::Finished;
        let callback = stream.callbacks.close.clone();
        if let Some(callback) = callback {
            invoke(&callback, |f| f(self, handle));
        }
        if let Some(stream) = self.streams.remove(handle) {
            info!(
                stream = %handle,
                sink = stream.sink_name(),
                role = %stream.role(),
                "stream closed"
            );
        }
    }

    /// Transport-specific configuration, forwarded to the owning sink.
    pub fn ioctl(&mut self, handle: StreamHandle, request: Ioctl) -> Result<()> {
        Ok(self.sink_of(handle)?.ioctl(handle, request)?)
    }

    /// Write directly to the transport, bypassing the transmit buffer.
    pub fn send(&mut self, handle: StreamHandle, data: &[u8]) -> Result<usize> {
        Ok(self.sink_of(handle)?.send(handle, data)?)
    }

    /// Read directly from the transport, bypassing the receive buffer.
    pub fn recv(&mut self, handle: StreamHandle, buf: &mut [u8]) -> Result<usize> {
        Ok(self.sink_of(handle)?.recv(handle, buf)?)
    }

    /// Queue raw bytes for transmission on the next cycle.
    pub fn send_to_buffer(&mut self, handle: StreamHandle, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut(handle)?;
        if stream.is_listening() {
            return Err(EngineError::ListeningStream(handle));
        }
        stream.tx.write_raw(data);
        Ok(())
    }

    /// Drain up to `buf.len()` bytes from the receive buffer.
    pub fn read_from_buffer(&mut self, handle: StreamHandle, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream_mut(handle)?.rx.read_into(buf))
    }

    pub fn stream(&self, handle: StreamHandle) -> Option<&Stream> {
        self.streams.get(handle)
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter()
    }

    /// Stream whose local node id is `id`.
    pub fn stream_by_local_id(&self, id: u32) -> Option<StreamHandle> {
        self.streams.find_by_local_id(id)
    }

    /// Stream whose synchronized peer has node id `id`.
    pub fn stream_by_remote_id(&self, id: u32) -> Option<StreamHandle> {
        self.streams.find_by_remote_id(id)
    }

    /// Stream holding `id` as either local or remote node id.
    pub fn stream_by_node_id(&self, id: u32) -> Option<StreamHandle> {
        self.streams.find_by_node_id(id)
    }

    fn stream_mut(&mut self, handle: StreamHandle) -> Result<&mut Stream> {
        self.streams
            .get_mut(handle)
            .ok_or(EngineError::StreamNotFound(handle))
    }

    // --- callbacks ---

    /// Called with the receive buffer whenever new bytes arrive; returns how
    /// many leading bytes it consumed.
    pub fn on_pollin<F>(&mut self, handle: StreamHandle, callback: F) -> Result<()>
    where
        F: FnMut(&mut Engine, StreamHandle, &[u8]) -> usize + 'static,
    {
        let slot = &mut self.stream_mut(handle)?.callbacks.pollin;
        if slot.is_some() {
            return Err(EngineError::AlreadyRegistered {
                handle,
                slot: "pollin",
            });
        }
        let callback: PollinCallback = Rc::new(RefCell::new(callback));
        *slot = Some(callback);
        Ok(())
    }

    /// Called on a listening stream with each newly accepted stream.
    pub fn on_accept<F>(&mut self, handle: StreamHandle, callback: F) -> Result<()>
    where
        F: FnMut(&mut Engine, StreamHandle, StreamHandle) + 'static,
    {
        let slot = &mut self.stream_mut(handle)?.callbacks.accept;
        if slot.is_some() {
            return Err(EngineError::AlreadyRegistered {
                handle,
                slot: "accept",
            });
        }
        let callback: AcceptCallback = Rc::new(RefCell::new(callback));
        *slot = Some(callback);
        Ok(())
    }

    /// Called once when the stream is destroyed.
    pub fn on_close<F>(&mut self, handle: StreamHandle, callback: F) -> Result<()>
    where
        F: FnMut(&mut Engine, StreamHandle) + 'static,
    {
        let slot = &mut self.stream_mut(handle)?.callbacks.close;
        if slot.is_some() {
            return Err(EngineError::AlreadyRegistered {
                handle,
                slot: "close",
            });
        }
        let callback: CloseCallback = Rc::new(RefCell::new(callback));
        *slot = Some(callback);
        Ok(())
    }

    /// Called with every routed request, response or publication addressed
    /// to this stream's node.
    pub fn on_packet<F>(&mut self, handle: StreamHandle, callback: F) -> Result<()>
    where
        F: FnMut(&mut Engine, StreamHandle, &Packet) -> Disposition + 'static,
    {
        let slot = &mut self.stream_mut(handle)?.callbacks.packet;
        if slot.is_some() {
            return Err(EngineError::AlreadyRegistered {
                handle,
                slot: "packet",
            });
        }
        let callback: PacketCallback = Rc::new(RefCell::new(callback));
        *slot = Some(callback);
        Ok(())
    }

    // --- protocol ---

    /// Parse the stream's bytes as packets and announce `node_id` to the peer.
    pub fn enable_protocol(&mut self, handle: StreamHandle, node_id: u32) -> Result<()> {
        if node_id == 0 {
            return Err(EngineError::InvalidNodeId);
        }
        let stream = self.stream_mut(handle)?;
        stream.protocol = true;
        stream.local_id = node_id;
        info!(stream = %handle, node_id = format_args!("0x{node_id:08x}"), "protocol enabled");
        Ok(())
    }

    /// Stop parsing packets and give up the stream's node id.
    pub fn disable_protocol(&mut self, handle: StreamHandle) -> Result<()> {
        let stream = self.stream_mut(handle)?;
        stream.protocol = false;
        stream.local_id = 0;
        info!(stream = %handle, "protocol disabled");
        Ok(())
    }

    /// Queue `packet` on `handle` and, when its destination is a synchronized
    /// peer on a different stream, on that stream too.
    pub fn send_packet(&mut self, handle: StreamHandle, packet: &Packet) -> Result<()> {
        let mut routed = false;
        if self.streams.get(handle).is_some_and(|s| !s.is_listening()) {
            self.queue_packet(handle, packet)?;
            routed = true;
        }
        if let Some(peer) = self.streams.find_by_remote_id(packet.dst()) {
            if peer != handle {
                self.queue_packet(peer, packet)?;
                routed = true;
            }
        }
        if routed {
            Ok(())
        } else {
            Err(EngineError::NoRoute { dst: packet.dst() })
        }
    }

    pub(crate) fn queue_packet(&mut self, handle: StreamHandle, packet: &Packet) -> Result<()> {
        let stream = self.stream_mut(handle)?;
        if stream.is_listening() {
            return Err(EngineError::ListeningStream(handle));
        }
        let frames = stream.tx.write_packet(packet)?;
        trace!(
            stream = %handle,
            leader = %packet.leader(),
            anchor = packet.anchor(),
            frames,
            "packet queued"
        );
        Ok(())
    }

    // --- poll loop ---

    /// Run one cycle: poll sinks, service every stream, pace, route.
    ///
    /// `wait` is slept literally when the cycle saw no new bytes; `None`
    /// uses the adaptive idle interval. Returns the number of streams that
    /// received bytes.
    pub fn poll(&mut self, wait: Option<Duration>) -> usize {
        let now = Instant::now();
        self.activity = 0;
        self.last_poll = Some(now);

        self.poll_sinks(now);
        self.dispatch_sink_events();
        for handle in self.streams.handles() {
            self.emit_sync(handle, now);
            self.flush(handle);
            self.drain_rx(handle, now);
        }
        self.pace(wait);
        self.route_pending();
        self.reap_hangups();
        self.activity
    }

    fn poll_sinks(&mut self, now: Instant) {
        let Self {
            sinks,
            streams,
            events,
            ..
        } = self;
        for sink in sinks.iter_mut() {
            let mut ctx = SinkContext {
                streams: &mut *streams,
                events: &mut *events,
                now,
            };
            if let Err(err) = sink.poll(&mut ctx) {
                warn!(sink = sink.name(), error = %err, "sink poll failed");
            }
        }
    }

    fn dispatch_sink_events(&mut self) {
        for event in std::mem::take(&mut self.events) {
            match event {
                SinkEvent::Accepted { listener, handle } => {
                    let callback = self
                        .streams
                        .get(listener)
                        .and_then(|s| s.callbacks.accept.clone());
                    if let Some(callback) = callback {
                        invoke(&callback, |f| f(self, listener, handle));
                    }
                }
                SinkEvent::Hangup(handle) => self.hangups.push(handle),
            }
        }
    }

    fn emit_sync(&mut self, handle: StreamHandle, now: Instant) {
        let interval = self.config.sync_interval;
        let due = self.streams.get(handle).is_some_and(|s| {
            s.protocol && !s.is_listening() && !s.closing && s.sync_due(now, interval)
        });
        if !due {
            return;
        }
        let sync = Packet::control(self.streams.advertised_id(handle), control::SYNC, "");
        match self.queue_packet(handle, &sync) {
            Ok(()) => {
                if let Some(stream) = self.streams.get_mut(handle) {
                    stream.sync_sent = Some(now);
                }
            }
            Err(err) => warn!(stream = %handle, error = %err, "failed to queue sync"),
        }
    }

    fn flush(&mut self, handle: StreamHandle) {
        let Some(stream) = self.streams.get_mut(handle) else {
            return;
        };
        if stream.tx.is_empty() || stream.is_listening() {
            return;
        }
        let Some(sink) = self.sinks.iter_mut().find(|s| s.name() == stream.sink_name()) else {
            return;
        };
        if !sink.writable(handle) {
            return;
        }
        match sink.send(handle, stream.tx.pending()) {
            Ok(sent) => {
                trace!(stream = %handle, sent, left = stream.tx.len() - sent, "flushed");
                stream.tx.advance(sent);
            }
            Err(err) => warn!(stream = %handle, error = %err, "send failed"),
        }
    }

    fn drain_rx(&mut self, handle: StreamHandle, now: Instant) {
        let Some(stream) = self.streams.get_mut(handle) else {
            return;
        };
        let fresh = std::mem::take(&mut stream.rx_fresh);
        if fresh {
            self.activity += 1;
            let callback = stream.callbacks.pollin.clone();
            if let Some(callback) = callback {
                let data = stream.rx.buffered().to_vec();
                let consumed = invoke(&callback, |f| f(self, handle, &data[..])).unwrap_or(0);
                if let Some(stream) = self.streams.get_mut(handle) {
                    stream.rx.consume(consumed);
                }
            }
        }

        let Some(stream) = self.streams.get_mut(handle) else {
            return;
        };
        if !stream.protocol || stream.closing || !(fresh || stream.rx.resync_due(now)) {
            return;
        }
        while let Some(packet) = stream.rx.next_packet(now) {
            trace!(
                stream = %handle,
                leader = %packet.leader(),
                anchor = packet.anchor(),
                "packet received"
            );
            self.pending.push_back(PendingMessage::new(handle, packet));
        }
    }

    fn pace(&mut self, wait: Option<Duration>) {
        let step = self.config.idle_step();
        if self.activity > 0 {
            self.idle = step;
            return;
        }
        let nap = match wait {
            Some(wait) => wait,
            None => {
                self.idle = (self.idle + step).min(self.config.idle_max);
                self.idle
            }
        };
        if !nap.is_zero() {
            std::thread::sleep(nap);
        }
    }

    fn reap_hangups(&mut self) {
        for handle in std::mem::take(&mut self.hangups) {
            if self.streams.contains(handle) {
                info!(stream = %handle, "peer hung up");
                self.destroy_stream(handle);
            }
        }
    }

    // --- introspection ---

    /// Messages parsed but not yet routed.
    pub fn pending_messages(&self) -> impl Iterator<Item = &PendingMessage> {
        self.pending.iter()
    }

    /// Current adaptive idle interval.
    pub fn idle_interval(&self) -> Duration {
        self.idle
    }

    /// Start time of the most recent cycle.
    pub fn last_poll(&self) -> Option<Instant> {
        self.last_poll
    }

    /// Tear everything down: pending messages, then every stream (close
    /// callbacks fire), then every sink.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.pending.clear();
        let streams = self.streams.len();
        for handle in self.streams.handles() {
            if let Err(err) = self.close(handle) {
                debug!(stream = %handle, error = %err, "close during shutdown failed");
            }
        }
        self.sinks.clear();
        debug!(streams, "engine shut down");
    }
}
