use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nodemux_engine::{Disposition, Engine, EngineConfig, Leader};
use nodemux_sink::{UnixSink, UNIX_SERVER};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, socket_addr, ServeArgs};
use crate::exit::{engine_error, CliResult, SUCCESS};
use crate::output::{node_id, OutputFormat};

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let config = EngineConfig {
        idle_max: parse_duration(&args.idle_max)?,
        sync_interval: parse_duration(&args.sync_interval)?,
        ..EngineConfig::default()
    };
    let mut engine = Engine::with_config(config);
    engine
        .register_sink(Box::new(UnixSink::server()))
        .map_err(|err| engine_error("sink setup failed", err))?;
    let listener = engine
        .open(UNIX_SERVER, socket_addr(&args.path)?)
        .map_err(|err| engine_error("bind failed", err))?;
    engine
        .enable_protocol(listener, args.node_id)
        .map_err(|err| engine_error("protocol setup failed", err))?;

    engine
        .on_accept(listener, |engine, _, conn| {
            info!(stream = %conn, "node connected");
            if let Err(err) = engine.on_packet(conn, |_, _, _| Disposition::Forward) {
                warn!(stream = %conn, error = %err, "failed to install forwarder");
            }
        })
        .map_err(|err| engine_error("handler setup failed", err))?;

    // Requests addressed to the hub itself are echoed back.
    engine
        .on_packet(listener, |engine, origin, packet| {
            if packet.leader() == Leader::Request {
                info!(
                    from = %node_id(packet.src()),
                    anchor = packet.anchor(),
                    size = packet.payload().len(),
                    "echoing request"
                );
                let reply = packet.reply(packet.payload().clone());
                if let Err(err) = engine.send_packet(origin, &reply) {
                    warn!(stream = %origin, error = %err, "echo send failed");
                }
            }
            Disposition::Finished
        })
        .map_err(|err| engine_error("handler setup failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!(
        path = %args.path.display(),
        node_id = %node_id(args.node_id),
        "hub listening"
    );
    while running.load(Ordering::SeqCst) {
        engine.poll(None);
    }

    info!("hub shutting down");
    engine.shutdown();
    Ok(SUCCESS)
}
