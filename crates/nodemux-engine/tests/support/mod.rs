#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use nodemux_engine::{Disposition, Engine, EngineConfig, Leader, Packet, StreamHandle, StreamRole};
use nodemux_frame::PacketReader;
use nodemux_sink::{MemoryNetwork, MemorySink, MEMORY_CLIENT, MEMORY_SERVER};

pub const HUB: &str = "hub";
pub const HUB_ID: u32 = 0x8888;

pub type Inbox = Rc<RefCell<Vec<Packet>>>;

pub fn quick_config() -> EngineConfig {
    EngineConfig {
        idle_max: Duration::from_millis(10),
        ..EngineConfig::default()
    }
}

pub fn engine_with_sinks(network: &MemoryNetwork) -> Engine {
    engine_with_config(network, quick_config())
}

pub fn engine_with_config(network: &MemoryNetwork, config: EngineConfig) -> Engine {
    let mut engine = Engine::with_config(config);
    engine
        .register_sink(Box::new(MemorySink::server(network)))
        .unwrap();
    engine
        .register_sink(Box::new(MemorySink::client(network)))
        .unwrap();
    engine
}

/// A hub node: listens on `HUB`, forwards everything arriving on accepted
/// streams and answers requests addressed to itself with `world`.
pub struct Hub {
    pub engine: Engine,
    pub listener: StreamHandle,
    pub local: Inbox,
}

impl Hub {
    pub fn new(network: &MemoryNetwork) -> Self {
        Self::with_handler(network, true)
    }

    pub fn with_handler(network: &MemoryNetwork, answer: bool) -> Self {
        let mut engine = engine_with_sinks(network);
        let listener = engine.open(MEMORY_SERVER, HUB).unwrap();
        engine.enable_protocol(listener, HUB_ID).unwrap();
        engine
            .on_accept(listener, |engine, _, conn| {
                engine
                    .on_packet(conn, |_, _, _| Disposition::Forward)
                    .unwrap();
            })
            .unwrap();

        let local = Inbox::default();
        if answer {
            let seen = Rc::clone(&local);
            engine
                .on_packet(listener, move |engine, origin, packet| {
                    seen.borrow_mut().push(packet.clone());
                    if packet.leader() == Leader::Request {
                        engine.send_packet(origin, &packet.reply("world")).unwrap();
                    }
                    Disposition::Finished
                })
                .unwrap();
        }
        Self {
            engine,
            listener,
            local,
        }
    }

    pub fn accepted(&self) -> Vec<StreamHandle> {
        self.engine
            .streams()
            .filter(|s| s.role() == StreamRole::Accepted)
            .map(|s| s.handle())
            .collect()
    }
}

/// A protocol client connected to the hub that records every packet routed
/// to it.
pub struct Node {
    pub engine: Engine,
    pub stream: StreamHandle,
    pub inbox: Inbox,
}

impl Node {
    pub fn new(network: &MemoryNetwork, node_id: u32) -> Self {
        let mut engine = engine_with_sinks(network);
        let stream = engine.open(MEMORY_CLIENT, HUB).unwrap();
        engine.enable_protocol(stream, node_id).unwrap();
        let inbox = Inbox::default();
        let seen = Rc::clone(&inbox);
        engine
            .on_packet(stream, move |_, _, packet| {
                seen.borrow_mut().push(packet.clone());
                Disposition::Finished
            })
            .unwrap();
        Self {
            engine,
            stream,
            inbox,
        }
    }

    pub fn send(&mut self, packet: &Packet) {
        self.engine.send_packet(self.stream, packet).unwrap();
    }

    pub fn take(&self, leader: Leader) -> Vec<Packet> {
        let mut inbox = self.inbox.borrow_mut();
        let (hit, keep): (Vec<_>, Vec<_>) = inbox.drain(..).partition(|p| p.leader() == leader);
        *inbox = keep;
        hit
    }
}

/// A client without the protocol: bytes in, bytes out.
pub struct RawClient {
    pub engine: Engine,
    pub stream: StreamHandle,
}

impl RawClient {
    pub fn new(network: &MemoryNetwork) -> Self {
        let mut engine = engine_with_sinks(network);
        let stream = engine.open(MEMORY_CLIENT, HUB).unwrap();
        Self { engine, stream }
    }

    pub fn send(&mut self, packet: &Packet) {
        let bytes = packet.encode().unwrap();
        self.engine.send_to_buffer(self.stream, &bytes).unwrap();
    }

    /// Decode everything received so far.
    pub fn received(&mut self) -> Vec<Packet> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = self.engine.read_from_buffer(self.stream, &mut buf).unwrap();
        let now = Instant::now();
        let mut reader = PacketReader::new();
        reader.extend(&buf[..n], now);
        std::iter::from_fn(|| reader.next_packet(now)).collect()
    }
}

/// Run `cycles` rounds in which every engine polls once, in order.
pub fn spin(engines: &mut [&mut Engine], cycles: usize) {
    for _ in 0..cycles {
        for engine in engines.iter_mut() {
            engine.poll(Some(Duration::ZERO));
        }
    }
}
