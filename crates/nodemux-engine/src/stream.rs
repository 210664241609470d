use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use nodemux_frame::{FrameConfig, Packet, PacketReader, PacketWriter};
use nodemux_sink::{StreamHandle, StreamRole};

use crate::callback::Callbacks;

/// Progress of the node-id handshake on one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No control packet seen yet.
    None,
    /// The peer's id was accepted and recorded as the remote id.
    Normal,
    /// The peer claimed an id another stream already holds.
    Duplicate,
    /// The peer claimed id 0.
    ZeroId,
    /// The stream is being torn down.
    Finished,
}

/// One connection-like handle and everything the engine tracks for it.
#[derive(Debug)]
pub struct Stream {
    handle: StreamHandle,
    sink: String,
    role: StreamRole,
    parent: Option<StreamHandle>,
    pub(crate) rx: PacketReader,
    pub(crate) tx: PacketWriter,
    pub(crate) rx_fresh: bool,
    pub(crate) protocol: bool,
    pub(crate) local_id: u32,
    pub(crate) remote_id: u32,
    pub(crate) state: HandshakeState,
    pub(crate) sync_sent: Option<Instant>,
    pub(crate) sync_received: Option<Instant>,
    pub(crate) subscriptions: HashSet<String>,
    pub(crate) callbacks: Callbacks,
    pub(crate) closing: bool,
}

impl Stream {
    fn new(
        handle: StreamHandle,
        sink: &str,
        role: StreamRole,
        parent: Option<StreamHandle>,
        config: &FrameConfig,
    ) -> Self {
        Self {
            handle,
            sink: sink.to_string(),
            role,
            parent,
            rx: PacketReader::with_config(config.clone()),
            tx: PacketWriter::with_fragment_size(config.fragment_size),
            rx_fresh: false,
            protocol: false,
            local_id: 0,
            remote_id: 0,
            state: HandshakeState::None,
            sync_sent: None,
            sync_received: None,
            subscriptions: HashSet::new(),
            callbacks: Callbacks::default(),
            closing: false,
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    /// Name of the sink that owns the transport.
    pub fn sink_name(&self) -> &str {
        &self.sink
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// The listening stream this one was accepted on.
    pub fn parent(&self) -> Option<StreamHandle> {
        self.parent
    }

    pub fn is_listening(&self) -> bool {
        self.role == StreamRole::Listening
    }

    pub fn protocol_enabled(&self) -> bool {
        self.protocol
    }

    /// Our node id on this stream, 0 if unset.
    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// The peer's node id, 0 until the handshake completes.
    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.state
    }

    pub fn last_sync_sent(&self) -> Option<Instant> {
        self.sync_sent
    }

    pub fn last_sync_received(&self) -> Option<Instant> {
        self.sync_received
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.contains(topic)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    /// Bytes received and not yet consumed or parsed.
    pub fn received(&self) -> &[u8] {
        self.rx.buffered()
    }

    /// Bytes queued for transmission.
    pub fn queued(&self) -> &[u8] {
        self.tx.pending()
    }

    /// Fragmented packet currently being reassembled.
    pub fn partial_packet(&self) -> Option<&Packet> {
        self.rx.partial()
    }

    /// Bytes dropped while resynchronizing the receive buffer.
    pub fn discarded(&self) -> u64 {
        self.rx.discarded()
    }

    pub(crate) fn sync_due(&self, now: Instant, interval: Duration) -> bool {
        self.sync_sent
            .is_none_or(|at| now.saturating_duration_since(at) > interval)
    }
}

/// Live streams, keyed by handle.
#[derive(Debug)]
pub(crate) struct StreamTable {
    streams: BTreeMap<StreamHandle, Stream>,
    next: u32,
    config: FrameConfig,
}

impl StreamTable {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            streams: BTreeMap::new(),
            next: 0,
            config,
        }
    }

    /// Create a stream. Accepted streams inherit the protocol flag of their
    /// listening parent.
    pub fn insert(
        &mut self,
        sink: &str,
        role: StreamRole,
        parent: Option<StreamHandle>,
    ) -> StreamHandle {
        let handle = self.allocate();
        let mut stream = Stream::new(handle, sink, role, parent, &self.config);
        stream.protocol = parent
            .and_then(|p| self.streams.get(&p))
            .is_some_and(|p| p.protocol);
        self.streams.insert(handle, stream);
        handle
    }

    fn allocate(&mut self) -> StreamHandle {
        loop {
            self.next = self.next.wrapping_add(1);
            let handle = StreamHandle::new(self.next);
            if self.next != 0 && !self.streams.contains_key(&handle) {
                return handle;
            }
        }
    }

    pub fn get(&self, handle: StreamHandle) -> Option<&Stream> {
        self.streams.get(&handle)
    }

    pub fn get_mut(&mut self, handle: StreamHandle) -> Option<&mut Stream> {
        self.streams.get_mut(&handle)
    }

    pub fn contains(&self, handle: StreamHandle) -> bool {
        self.streams.contains_key(&handle)
    }

    pub fn remove(&mut self, handle: StreamHandle) -> Option<Stream> {
        self.streams.remove(&handle)
    }

    pub fn handles(&self) -> Vec<StreamHandle> {
        self.streams.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    fn find(&self, pred: impl Fn(&Stream) -> bool) -> Option<StreamHandle> {
        self.streams.values().find(|s| pred(s)).map(|s| s.handle)
    }

    pub fn find_by_local_id(&self, id: u32) -> Option<StreamHandle> {
        if id == 0 {
            return None;
        }
        self.find(|s| s.local_id == id)
    }

    pub fn find_by_remote_id(&self, id: u32) -> Option<StreamHandle> {
        if id == 0 {
            return None;
        }
        self.find(|s| s.remote_id == id)
    }

    pub fn find_by_node_id(&self, id: u32) -> Option<StreamHandle> {
        if id == 0 {
            return None;
        }
        self.find(|s| s.local_id == id || s.remote_id == id)
    }

    /// A stream other than `except` that holds `id` as local or remote id.
    pub fn holder_of(&self, id: u32, except: StreamHandle) -> Option<StreamHandle> {
        if id == 0 {
            return None;
        }
        self.find(|s| s.handle != except && (s.local_id == id || s.remote_id == id))
    }

    /// The id a stream announces in its control packets: its own local id,
    /// or for an accepted stream the local id of its listening parent.
    pub fn advertised_id(&self, handle: StreamHandle) -> u32 {
        let Some(stream) = self.streams.get(&handle) else {
            return 0;
        };
        match (stream.role, stream.parent) {
            (StreamRole::Accepted, Some(parent)) => {
                self.streams.get(&parent).map_or(0, |p| p.local_id)
            }
            _ => stream.local_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StreamTable {
        StreamTable::new(FrameConfig::default())
    }

    #[test]
    fn handles_are_unique_and_monotonic() {
        let mut table = table();
        let a = table.insert("s", StreamRole::Connected, None);
        let b = table.insert("s", StreamRole::Connected, None);
        table.remove(a);
        let c = table.insert("s", StreamRole::Connected, None);
        assert!(a < b && b < c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn zero_id_never_matches() {
        let mut table = table();
        table.insert("s", StreamRole::Connected, None);
        assert_eq!(table.find_by_local_id(0), None);
        assert_eq!(table.find_by_remote_id(0), None);
        assert_eq!(table.find_by_node_id(0), None);
    }

    #[test]
    fn lookups_by_id() {
        let mut table = table();
        let a = table.insert("s", StreamRole::Connected, None);
        let b = table.insert("s", StreamRole::Connected, None);
        table.get_mut(a).unwrap().local_id = 0x10;
        table.get_mut(b).unwrap().remote_id = 0x20;

        assert_eq!(table.find_by_local_id(0x10), Some(a));
        assert_eq!(table.find_by_remote_id(0x20), Some(b));
        assert_eq!(table.find_by_node_id(0x20), Some(b));
        assert_eq!(table.find_by_local_id(0x20), None);
        assert_eq!(table.holder_of(0x20, b), None);
        assert_eq!(table.holder_of(0x20, a), Some(b));
    }

    #[test]
    fn accepted_streams_inherit_protocol_and_advertise_parent_id() {
        let mut table = table();
        let listener = table.insert("s", StreamRole::Listening, None);
        {
            let l = table.get_mut(listener).unwrap();
            l.protocol = true;
            l.local_id = 0x8888;
        }
        let child = table.insert("s", StreamRole::Accepted, Some(listener));
        assert!(table.get(child).unwrap().protocol_enabled());
        assert_eq!(table.get(child).unwrap().local_id(), 0);
        assert_eq!(table.advertised_id(child), 0x8888);

        table.remove(listener);
        assert_eq!(table.advertised_id(child), 0);
    }

    #[test]
    fn sync_due_after_interval() {
        let mut table = table();
        let h = table.insert("s", StreamRole::Connected, None);
        let now = Instant::now();
        let interval = Duration::from_secs(5);
        let stream = table.get_mut(h).unwrap();
        assert!(stream.sync_due(now, interval));
        stream.sync_sent = Some(now);
        assert!(!stream.sync_due(now + Duration::from_secs(5), interval));
        assert!(stream.sync_due(now + Duration::from_secs(6), interval));
    }
}
