use nodemux_engine::{Leader, Packet, Reply};

use crate::cmd::session::ClientSession;
use crate::cmd::{parse_duration, resolve_payload, RequestArgs};
use crate::exit::{reply_error, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.node.timeout)?;
    let payload = resolve_payload(&args.payload)?;

    let mut session = ClientSession::connect(&args.node.path, args.node.node_id)?;
    session.wait_sync(timeout)?;

    let request = Packet::request(args.node.node_id, args.dst, args.anchor, payload);
    session.send(&request)?;
    let response = session.wait_for(timeout, |p| answers(&request, p))?;
    print_packet(&response, format);

    match Reply::from_payload(response.payload()) {
        Some(reply) if !reply.is_ok() => Err(reply_error("request failed", &reply)),
        _ => Ok(SUCCESS),
    }
}

/// A response answers a request when it echoes the anchor and the request's
/// checksum.
fn answers(request: &Packet, candidate: &Packet) -> bool {
    candidate.leader() == Leader::Response
        && candidate.anchor() == request.anchor()
        && candidate.req_crc() == Some(request.crc())
}
