//! Node-id handshake driven by control packets.
//!
//! Every protocol stream periodically sends `/sync` claiming its node id. The
//! receiving side accepts the claim unless the id is 0 or already held by
//! another live stream, in which case it answers with `/nodeid/zero` or
//! `/nodeid/dup` and the stream stays open but unsynchronized.

use std::time::Instant;

use nodemux_frame::{control, Packet};
use nodemux_sink::StreamHandle;
use tracing::{info, trace, warn};

use crate::engine::Engine;
use crate::stream::{HandshakeState, StreamTable};

/// Outcome of evaluating one control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    ZeroId,
    Duplicate { holder: StreamHandle },
    Synced,
    Ignored,
}

pub(crate) fn evaluate(table: &StreamTable, origin: StreamHandle, packet: &Packet) -> Verdict {
    let claimed = packet.src();
    if claimed == 0 {
        return Verdict::ZeroId;
    }
    if let Some(holder) = table.holder_of(claimed, origin) {
        return Verdict::Duplicate { holder };
    }
    if packet.anchor() == control::SYNC {
        Verdict::Synced
    } else {
        Verdict::Ignored
    }
}

impl Engine {
    pub(crate) fn handle_control(&mut self, origin: StreamHandle, packet: &Packet) {
        let verdict = evaluate(&self.streams, origin, packet);
        let claimed = packet.src();
        let (state, answer) = match verdict {
            Verdict::ZeroId => {
                warn!(stream = %origin, "peer claimed node id 0");
                (HandshakeState::ZeroId, Some(control::NODEID_ZERO))
            }
            Verdict::Duplicate { holder } => {
                warn!(
                    stream = %origin,
                    holder = %holder,
                    node_id = format_args!("0x{claimed:08x}"),
                    "peer claimed a node id already in use"
                );
                (HandshakeState::Duplicate, Some(control::NODEID_DUP))
            }
            Verdict::Synced => (HandshakeState::Normal, None),
            Verdict::Ignored => {
                trace!(stream = %origin, anchor = packet.anchor(), "control packet ignored");
                return;
            }
        };

        if let Some(anchor) = answer {
            let src = self.streams.advertised_id(origin);
            if let Err(err) = self.queue_packet(origin, &Packet::control(src, anchor, "")) {
                warn!(stream = %origin, error = %err, "failed to queue handshake reply");
            }
        }

        let Some(stream) = self.streams.get_mut(origin) else {
            return;
        };
        let first = stream.state != state || stream.remote_id != claimed;
        stream.state = state;
        if state == HandshakeState::Normal {
            stream.remote_id = claimed;
            stream.sync_received = Some(Instant::now());
            if first {
                info!(
                    stream = %origin,
                    remote_id = format_args!("0x{claimed:08x}"),
                    "node id synchronized"
                );
            }
        }
    }
}
