use bytes::{Bytes, BytesMut};

use crate::checksum::crc16;
use crate::codec::{encode_packet, HEADER_SIZE, REQ_CRC_SIZE, TRAILER_SIZE};
use crate::error::{FrameError, Result};
use crate::leader::Leader;

/// Protocol version written into every frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// One logical protocol message, or one frame of a fragmented message.
///
/// The payload checksum is always derived from the payload; it cannot be set
/// independently. Only responses carry a request checksum, which correlates
/// them with the request they answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    leader: Leader,
    fin: bool,
    version: u8,
    src: u32,
    dst: u32,
    anchor: String,
    payload: Bytes,
    crc: u16,
    req_crc: u16,
}

impl Packet {
    /// Build a final (unfragmented) packet.
    pub fn new(
        leader: Leader,
        src: u32,
        dst: u32,
        anchor: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        Self {
            leader,
            fin: true,
            version: PROTOCOL_VERSION,
            src,
            dst,
            anchor: anchor.into(),
            crc: crc16(&payload),
            payload,
            req_crc: 0,
        }
    }

    pub fn request(src: u32, dst: u32, anchor: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(Leader::Request, src, dst, anchor, payload)
    }

    /// A response correlated with the request whose payload checksum is `req_crc`.
    pub fn response(
        src: u32,
        dst: u32,
        anchor: impl Into<String>,
        payload: impl Into<Bytes>,
        req_crc: u16,
    ) -> Self {
        let mut packet = Self::new(Leader::Response, src, dst, anchor, payload);
        packet.req_crc = req_crc;
        packet
    }

    /// Publications carry no node ids; the topic is the anchor.
    pub fn publish(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(Leader::Publish, 0, 0, topic, payload)
    }

    pub fn subscribe(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(Leader::Subscribe, 0, 0, topic, payload)
    }

    pub fn unsubscribe(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(Leader::Unsubscribe, 0, 0, topic, payload)
    }

    /// A handshake packet claiming `src` as the sender's node id.
    pub fn control(src: u32, anchor: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(Leader::Control, src, 0, anchor, payload)
    }

    /// Answer this packet: swapped ids, same anchor, correlated by checksum.
    pub fn reply(&self, payload: impl Into<Bytes>) -> Self {
        Self::response(self.dst, self.src, self.anchor.clone(), payload, self.crc)
    }

    /// Override source and destination ids.
    pub fn with_ids(mut self, src: u32, dst: u32) -> Self {
        self.src = src;
        self.dst = dst;
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_wire(
        leader: Leader,
        fin: bool,
        version: u8,
        src: u32,
        dst: u32,
        anchor: String,
        payload: Bytes,
        crc: u16,
        req_crc: u16,
    ) -> Self {
        Self {
            leader,
            fin,
            version,
            src,
            dst,
            anchor,
            payload,
            crc,
            req_crc,
        }
    }

    pub fn leader(&self) -> Leader {
        self.leader
    }

    /// Whether this is the last frame of its packet.
    pub fn is_final(&self) -> bool {
        self.fin
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn src(&self) -> u32 {
        self.src
    }

    pub fn dst(&self) -> u32 {
        self.dst
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// CRC-16 of the payload.
    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// Checksum of the request this response answers.
    pub fn req_crc(&self) -> Option<u16> {
        self.leader.carries_req_crc().then_some(self.req_crc)
    }

    /// Encoded size of this packet as a single frame.
    pub fn wire_size(&self) -> usize {
        let req = if self.leader.carries_req_crc() { REQ_CRC_SIZE } else { 0 };
        HEADER_SIZE + req + self.anchor.len() + self.payload.len() + TRAILER_SIZE
    }

    /// Encode this packet as a single frame.
    pub fn encode(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_packet(self, &mut buf)?;
        Ok(buf)
    }

    /// Whether `next` belongs to the same fragmented packet as `self`.
    pub fn continues(&self, next: &Packet) -> bool {
        !self.fin
            && self.leader == next.leader
            && self.version == next.version
            && self.src == next.src
            && self.dst == next.dst
            && self.anchor == next.anchor
    }

    /// Append the frame `next` to this partial packet.
    pub fn concat(&self, next: &Packet) -> Result<Packet> {
        if !self.continues(next) {
            return Err(FrameError::FragmentMismatch);
        }
        let mut payload = BytesMut::with_capacity(self.payload.len() + next.payload.len());
        payload.extend_from_slice(&self.payload);
        payload.extend_from_slice(&next.payload);
        let payload = payload.freeze();
        Ok(Packet {
            fin: next.fin,
            crc: crc16(&payload),
            payload,
            anchor: self.anchor.clone(),
            ..*self
        })
    }

    pub(crate) fn fragment(&self, fin: bool, payload: Bytes) -> Packet {
        Packet {
            fin,
            crc: crc16(&payload),
            payload,
            anchor: self.anchor.clone(),
            ..*self
        }
    }
}
