use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nodemux_engine::{Leader, Packet, Reply};
use tracing::{debug, info};

use crate::cmd::session::ClientSession;
use crate::cmd::{install_ctrlc_handler, parse_duration, SubscribeArgs};
use crate::exit::{reply_error, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

const WAKE: Duration = Duration::from_millis(100);

pub fn run(args: SubscribeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.node.timeout)?;

    let mut session = ClientSession::connect(&args.node.path, args.node.node_id)?;
    session.wait_sync(timeout)?;

    let subscribe = Packet::subscribe(args.topic.as_str(), "");
    session.send(&subscribe)?;
    let ack = session.wait_for(timeout, |p| {
        p.leader() == Leader::Response && p.req_crc() == Some(subscribe.crc())
    })?;
    if let Some(reply) = Reply::from_payload(ack.payload()) {
        if !reply.is_ok() {
            return Err(reply_error("subscribe failed", &reply));
        }
    }
    info!(topic = %args.topic, "subscribed");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let Some(packet) = session.next(WAKE)? else {
            continue;
        };
        if packet.leader() != Leader::Publish || packet.anchor() != args.topic {
            debug!(leader = %packet.leader(), anchor = packet.anchor(), "ignoring packet");
            continue;
        }

        print_packet(&packet, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    Ok(SUCCESS)
}
