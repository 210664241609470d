use bytes::{Buf, BytesMut};

use crate::codec::{encode_packet, DEFAULT_FRAGMENT_SIZE};
use crate::error::Result;
use crate::fragment::fragments;
use crate::packet::Packet;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Transmit side of one stream.
///
/// Packets are fragment-encoded into an outgoing byte buffer; the owner
/// drains it with [`pending`](Self::pending) and [`advance`](Self::advance)
/// as the transport accepts bytes.
#[derive(Debug)]
pub struct PacketWriter {
    buf: BytesMut,
    fragment_size: usize,
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_fragment_size(DEFAULT_FRAGMENT_SIZE)
    }

    pub fn with_fragment_size(fragment_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            fragment_size,
        }
    }

    /// Queue `packet`, split into frames as needed. Returns the frame count.
    ///
    /// Nothing is queued if the packet cannot be encoded.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<usize> {
        let mark = self.buf.len();
        let mut count = 0;
        for frame in fragments(packet, self.fragment_size) {
            if let Err(err) = encode_packet(&frame, &mut self.buf) {
                self.buf.truncate(mark);
                return Err(err);
            }
            count += 1;
        }
        Ok(count)
    }

    /// Queue raw bytes verbatim.
    pub fn write_raw(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes waiting to be sent.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop the first `n` bytes after the transport accepted them.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::codec::MAX_ANCHOR_LEN;
    use crate::reader::PacketReader;

    #[test]
    fn queued_packets_decode_in_order() {
        let first = Packet::request(1, 2, "/a", "one");
        let second = Packet::request(1, 2, "/b", vec![3u8; 3000]);
        let mut writer = PacketWriter::new();
        assert_eq!(writer.write_packet(&first).unwrap(), 1);
        assert_eq!(writer.write_packet(&second).unwrap(), 3);

        let now = Instant::now();
        let mut reader = PacketReader::new();
        reader.extend(writer.pending(), now);
        assert_eq!(reader.next_packet(now), Some(first));
        assert_eq!(reader.next_packet(now), Some(second));
    }

    #[test]
    fn custom_fragment_size_is_honoured() {
        let packet = Packet::request(1, 2, "/big", vec![9u8; 40]);
        let mut writer = PacketWriter::with_fragment_size(16);
        assert_eq!(writer.write_packet(&packet).unwrap(), 3);

        let now = Instant::now();
        let mut reader = PacketReader::new();
        reader.extend(writer.pending(), now);
        assert_eq!(reader.next_packet(now), Some(packet));
        assert!(reader.buffered().is_empty());
    }

    #[test]
    fn partial_drain() {
        let mut writer = PacketWriter::new();
        writer.write_raw(b"abcdef");
        writer.advance(4);
        assert_eq!(writer.pending(), b"ef");
        writer.advance(100);
        assert!(writer.is_empty());
    }

    #[test]
    fn failed_encode_queues_nothing() {
        let mut writer = PacketWriter::new();
        writer.write_raw(b"keep");
        let bad = Packet::request(1, 2, "x".repeat(MAX_ANCHOR_LEN + 1), vec![0u8; 4000]);
        assert!(writer.write_packet(&bad).is_err());
        assert_eq!(writer.pending(), b"keep");
    }
}
