use tracing::{debug, trace};

use crate::packet::Packet;

/// Joins consecutive frames of one stream back into whole packets.
///
/// At most one non-final packet is held. A frame that does not continue it
/// replaces it; the abandoned partial is counted and logged, not reported.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: Option<Packet>,
    abandoned: u64,
}

impl Reassembler {
    /// Feed one decoded frame; returns the packet it completes, if any.
    pub fn push(&mut self, frame: Packet) -> Option<Packet> {
        let current = match self.partial.take() {
            None => frame,
            Some(held) => match held.concat(&frame) {
                Ok(joined) => joined,
                Err(_) => {
                    debug!(
                        leader = %held.leader(),
                        anchor = held.anchor(),
                        held = held.payload().len(),
                        "abandoning partial packet"
                    );
                    self.abandoned += 1;
                    frame
                }
            },
        };

        if current.is_final() {
            Some(current)
        } else {
            trace!(
                anchor = current.anchor(),
                held = current.payload().len(),
                "holding partial packet"
            );
            self.partial = Some(current);
            None
        }
    }

    /// The packet currently under construction.
    pub fn partial(&self) -> Option<&Packet> {
        self.partial.as_ref()
    }

    /// Number of partial packets dropped because a foreign frame interrupted them.
    pub fn abandoned(&self) -> u64 {
        self.abandoned
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::fragment::fragments;

    #[test]
    fn final_frame_passes_through() {
        let mut reassembler = Reassembler::default();
        let packet = Packet::request(1, 2, "/a", "x");
        assert_eq!(reassembler.push(packet.clone()), Some(packet));
    }

    #[test]
    fn mismatched_frame_replaces_partial() {
        let big = Packet::request(1, 2, "/big", vec![7u8; 3000]);
        let mut frames = fragments(&big, 1400);
        let first = frames.next().unwrap();

        let mut reassembler = Reassembler::default();
        assert!(reassembler.push(first).is_none());
        assert!(reassembler.partial().is_some());

        let intruder = Packet::request(1, 2, "/other", "y");
        assert_eq!(reassembler.push(intruder.clone()), Some(intruder));
        assert_eq!(reassembler.abandoned(), 1);
        assert!(reassembler.partial().is_none());
    }

    #[test]
    fn intruding_non_final_frame_is_held() {
        let a = Packet::request(1, 2, "/a", vec![1u8; 2000]);
        let b = Packet::request(1, 3, "/a", vec![2u8; 2000]);
        let mut reassembler = Reassembler::default();
        reassembler.push(fragments(&a, 1400).next().unwrap());
        reassembler.push(fragments(&b, 1400).next().unwrap());
        assert_eq!(reassembler.partial().map(|p| p.dst()), Some(3));
        assert_eq!(
            reassembler.partial().map(|p| p.payload().clone()),
            Some(Bytes::from(vec![2u8; 1400]))
        );
    }
}
