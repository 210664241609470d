use nodemux_frame::Packet;
use nodemux_sink::StreamHandle;

/// Lifecycle of a queued packet within one routing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pending,
    /// Routed; reclaimed at the end of the cycle.
    Finished,
    /// A handler asked for the packet to be forwarded.
    Forward,
}

/// A reassembled packet waiting for the router, tagged with its origin.
#[derive(Debug)]
pub struct PendingMessage {
    origin: StreamHandle,
    packet: Packet,
    state: MessageState,
}

impl PendingMessage {
    pub fn new(origin: StreamHandle, packet: Packet) -> Self {
        Self {
            origin,
            packet,
            state: MessageState::Pending,
        }
    }

    /// Stream the packet arrived on.
    pub fn origin(&self) -> StreamHandle {
        self.origin
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == MessageState::Finished
    }

    pub(crate) fn finish(&mut self) {
        self.state = MessageState::Finished;
    }

    pub(crate) fn mark_forward(&mut self) {
        if self.state == MessageState::Pending {
            self.state = MessageState::Forward;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_mark_does_not_revive_finished() {
        let mut msg = PendingMessage::new(StreamHandle::new(1), Packet::publish("/t", ""));
        assert_eq!(msg.state(), MessageState::Pending);
        msg.mark_forward();
        assert_eq!(msg.state(), MessageState::Forward);
        msg.finish();
        msg.mark_forward();
        assert!(msg.is_finished());
    }
}
