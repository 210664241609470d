//! Minimal hub: routes between nodes and echoes requests addressed to it.
//! Exits once the first connected node goes away.
//!
//! Run with:
//!   cargo run --example echo-hub
//!
//! In another terminal:
//!   cargo run --features cli -- request /tmp/nodemux-echo-<pid>.sock \
//!     --node-id 0x3333 --dst 0x8888 --anchor /echo --data hello

use std::cell::Cell;
use std::rc::Rc;

use nodemux::engine::{Disposition, Engine, Leader};
use nodemux::sink::{UnixSink, UNIX_SERVER};

const HUB_ID: u32 = 0x8888;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_path = std::env::temp_dir().join(format!("nodemux-echo-{}.sock", std::process::id()));
    let addr = sock_path.to_str().ok_or("temp dir is not UTF-8")?;

    let mut engine = Engine::new();
    engine.register_sink(Box::new(UnixSink::server()))?;
    let listener = engine.open(UNIX_SERVER, addr)?;
    engine.enable_protocol(listener, HUB_ID)?;
    eprintln!("Listening on {} as 0x{HUB_ID:08x}", sock_path.display());

    let done = Rc::new(Cell::new(false));
    let flag = Rc::clone(&done);
    engine.on_accept(listener, move |engine, _, conn| {
        eprintln!("Node connected on {conn}");
        let flag = Rc::clone(&flag);
        let _ = engine.on_packet(conn, |_, _, _| Disposition::Forward);
        let _ = engine.on_close(conn, move |_, conn| {
            eprintln!("Node on {conn} went away");
            flag.set(true);
        });
    })?;
    engine.on_packet(listener, |engine, origin, packet| {
        if packet.leader() == Leader::Request {
            eprintln!(
                "Echoing {} bytes on {} from 0x{:08x}",
                packet.payload().len(),
                packet.anchor(),
                packet.src()
            );
            let _ = engine.send_packet(origin, &packet.reply(packet.payload().clone()));
        }
        Disposition::Finished
    })?;

    while !done.get() {
        engine.poll(None);
    }
    engine.shutdown();
    Ok(())
}
