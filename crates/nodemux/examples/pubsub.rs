//! Publish/subscribe between three in-process engines over memory sinks.
//!
//! Run with:
//!   cargo run --example pubsub

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use nodemux::engine::{Disposition, Engine, Leader, Packet, StreamHandle};
use nodemux::sink::{MemoryNetwork, MemorySink, MEMORY_CLIENT, MEMORY_SERVER};

const HUB: &str = "hub";

fn node(network: &MemoryNetwork, id: u32) -> Result<(Engine, StreamHandle), Box<dyn std::error::Error>> {
    let mut engine = Engine::new();
    engine.register_sink(Box::new(MemorySink::client(network)))?;
    let stream = engine.open(MEMORY_CLIENT, HUB)?;
    engine.enable_protocol(stream, id)?;
    Ok((engine, stream))
}

fn spin(engines: &mut [&mut Engine]) {
    for _ in 0..4 {
        for engine in engines.iter_mut() {
            engine.poll(Some(Duration::ZERO));
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let network = MemoryNetwork::new();

    let mut hub = Engine::new();
    hub.register_sink(Box::new(MemorySink::server(&network)))?;
    let listener = hub.open(MEMORY_SERVER, HUB)?;
    hub.enable_protocol(listener, 0x8888)?;
    hub.on_accept(listener, |engine, _, conn| {
        let _ = engine.on_packet(conn, |_, _, _| Disposition::Forward);
    })?;

    let (mut reader, reader_stream) = node(&network, 0x1111)?;
    let (mut writer, writer_stream) = node(&network, 0x2222)?;
    let received = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&received);
    reader.on_packet(reader_stream, move |_, _, packet| {
        if packet.leader() == Leader::Publish {
            seen.borrow_mut().push(packet.clone());
        }
        Disposition::Finished
    })?;

    spin(&mut [&mut reader, &mut writer, &mut hub]);
    reader.send_packet(reader_stream, &Packet::subscribe("/news", ""))?;
    spin(&mut [&mut reader, &mut writer, &mut hub]);

    for headline in ["first", "second"] {
        writer.send_packet(writer_stream, &Packet::publish("/news", headline))?;
        writer.send_packet(writer_stream, &Packet::publish("/weather", "rain"))?;
    }
    spin(&mut [&mut reader, &mut writer, &mut hub]);

    for packet in received.borrow().iter() {
        println!(
            "{} {}",
            packet.anchor(),
            String::from_utf8_lossy(packet.payload())
        );
    }
    Ok(())
}
