use nodemux_engine::Packet;
use tracing::info;

use crate::cmd::session::ClientSession;
use crate::cmd::{parse_duration, resolve_payload, PublishArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: PublishArgs, _format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.node.timeout)?;
    let payload = resolve_payload(&args.payload)?;

    let mut session = ClientSession::connect(&args.node.path, args.node.node_id)?;
    session.wait_sync(timeout)?;

    let size = payload.len();
    session.send(&Packet::publish(args.topic.as_str(), payload))?;
    session.flush(timeout)?;
    info!(topic = %args.topic, size, "published");

    Ok(SUCCESS)
}
