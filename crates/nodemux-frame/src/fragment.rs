use tracing::trace;

use crate::packet::Packet;

/// Split `packet` into frames carrying at most `limit` payload bytes each.
///
/// Every frame but the last is non-final and carries exactly `limit` bytes.
/// A payload that fits in one frame (including an empty one) yields a single
/// final frame; a payload that divides evenly never produces a trailing empty
/// frame.
pub fn fragments(packet: &Packet, limit: usize) -> Fragments<'_> {
    Fragments {
        packet,
        limit: limit.max(1),
        offset: 0,
        done: false,
    }
}

/// Iterator returned by [`fragments`].
pub struct Fragments<'a> {
    packet: &'a Packet,
    limit: usize,
    offset: usize,
    done: bool,
}

impl Iterator for Fragments<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self.done {
            return None;
        }
        let payload = self.packet.payload();
        let remaining = payload.len() - self.offset;
        if remaining <= self.limit {
            self.done = true;
            if self.offset == 0 {
                return Some(self.packet.clone());
            }
            return Some(self.packet.fragment(true, payload.slice(self.offset..)));
        }
        let end = self.offset + self.limit;
        let frame = self.packet.fragment(false, payload.slice(self.offset..end));
        trace!(
            anchor = self.packet.anchor(),
            offset = self.offset,
            len = self.limit,
            "split fragment"
        );
        self.offset = end;
        Some(frame)
    }
}
