use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::checksum::crc16;
use crate::error::{FrameError, Result};
use crate::leader::Leader;
use crate::packet::{Packet, PROTOCOL_VERSION};

/// Fixed header: magic (2) + leader (1) + flags (1) + version (1) +
/// src (4) + dst (4) + anchor length (2) + payload length (4).
pub const HEADER_SIZE: usize = 19;

/// Request checksum that follows the header of response frames.
pub const REQ_CRC_SIZE: usize = 2;

/// Payload checksum trailer.
pub const TRAILER_SIZE: usize = 2;

/// Magic bytes: "NM" (0x4E 0x4D).
pub const MAGIC: [u8; 2] = [0x4E, 0x4D];

/// Maximum anchor length in bytes.
pub const MAX_ANCHOR_LEN: usize = 1024;

/// Default maximum payload size per frame: 64 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// Payloads of at least this many bytes are split across frames.
pub const DEFAULT_FRAGMENT_SIZE: usize = 1400;

/// How long an unparseable receive buffer is kept waiting for more bytes.
pub const DEFAULT_RESYNC_TIMEOUT: Duration = Duration::from_secs(1);

const FLAG_FINAL: u8 = 0x01;

/// Limits applied by the codec and the per-stream reader/writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest payload accepted in one frame.
    pub max_payload_size: usize,
    /// Largest anchor accepted in one frame.
    pub max_anchor_len: usize,
    /// Payload bytes per frame when fragmenting.
    pub fragment_size: usize,
    /// Time since the last arrival after which junk is force-discarded.
    pub resync_timeout: Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_anchor_len: MAX_ANCHOR_LEN,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            resync_timeout: DEFAULT_RESYNC_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    leader: Leader,
    fin: bool,
    version: u8,
    src: u32,
    dst: u32,
    anchor_len: usize,
    payload_len: usize,
}

impl Header {
    fn frame_len(&self) -> usize {
        let req = if self.leader.carries_req_crc() { REQ_CRC_SIZE } else { 0 };
        HEADER_SIZE + req + self.anchor_len + self.payload_len + TRAILER_SIZE
    }
}

/// Encode one frame.
///
/// Wire format (integers little-endian):
/// ```text
/// ┌────────┬────────┬───────┬─────────┬────────┬────────┬──────────┬───────────┐
/// │ "NM"   │ leader │ flags │ version │ src    │ dst    │ anchor   │ payload   │
/// │ 2B     │ 1B     │ 1B    │ 1B      │ 4B     │ 4B     │ len 2B   │ len 4B    │
/// ├────────┴────────┴───────┴─────────┴────────┴────────┴──────────┴───────────┤
/// │ [req crc 2B, responses only] anchor │ payload │ crc16(payload) 2B          │
/// └────────────────────────────────────────────────────────────────────────────┘
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    let anchor = packet.anchor().as_bytes();
    let payload = packet.payload();
    if anchor.len() > MAX_ANCHOR_LEN {
        return Err(FrameError::AnchorTooLong {
            len: anchor.len(),
            max: MAX_ANCHOR_LEN,
        });
    }
    let payload_len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    dst.reserve(packet.wire_size());
    dst.put_slice(&MAGIC);
    dst.put_u8(packet.leader().as_byte());
    dst.put_u8(if packet.is_final() { FLAG_FINAL } else { 0 });
    dst.put_u8(packet.version());
    dst.put_u32_le(packet.src());
    dst.put_u32_le(packet.dst());
    dst.put_u16_le(anchor.len() as u16);
    dst.put_u32_le(payload_len);
    if let Some(req_crc) = packet.req_crc() {
        dst.put_u16_le(req_crc);
    }
    dst.put_slice(anchor);
    dst.put_slice(payload);
    dst.put_u16_le(packet.crc());

    trace!(
        leader = %packet.leader(),
        anchor = packet.anchor(),
        len = payload.len(),
        fin = packet.is_final(),
        "encoded frame"
    );
    Ok(())
}

/// Validate as much of a header as `buf` holds.
///
/// Returns `Ok(None)` when every available byte is consistent with a header
/// but the fixed part is not complete yet.
fn parse_header(buf: &[u8], config: &FrameConfig) -> Result<Option<Header>> {
    let magic = buf.len().min(MAGIC.len());
    if buf[..magic] != MAGIC[..magic] {
        return Err(FrameError::InvalidMagic);
    }
    let leader = match buf.get(2) {
        Some(&byte) => Leader::try_from(byte)?,
        None => return Ok(None),
    };
    let flags = match buf.get(3) {
        Some(&flags) if flags & !FLAG_FINAL != 0 => return Err(FrameError::InvalidFlags(flags)),
        Some(&flags) => flags,
        None => return Ok(None),
    };
    let version = match buf.get(4) {
        Some(&version) if version != PROTOCOL_VERSION => {
            return Err(FrameError::UnsupportedVersion(version))
        }
        Some(&version) => version,
        None => return Ok(None),
    };
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut fields = &buf[5..HEADER_SIZE];
    let src = fields.get_u32_le();
    let dst = fields.get_u32_le();
    let anchor_len = usize::from(fields.get_u16_le());
    let payload_len = fields.get_u32_le() as usize;

    if anchor_len > config.max_anchor_len {
        return Err(FrameError::AnchorTooLong {
            len: anchor_len,
            max: config.max_anchor_len,
        });
    }
    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    Ok(Some(Header {
        leader,
        fin: flags & FLAG_FINAL != 0,
        version,
        src,
        dst,
        anchor_len,
        payload_len,
    }))
}

/// Decode one frame from the front of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// The frame bytes are consumed only on success; on error the buffer is left
/// untouched so the caller can decide how much to skip.
pub fn decode_packet(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Packet>> {
    let Some(header) = parse_header(&src[..], config)? else {
        return Ok(None);
    };
    let frame_len = header.frame_len();
    if src.len() < frame_len {
        return Ok(None);
    }

    let mut body = &src[HEADER_SIZE..frame_len];
    let req_crc = if header.leader.carries_req_crc() {
        body.get_u16_le()
    } else {
        0
    };
    let anchor_start = frame_len - body.len();
    let payload_start = anchor_start + header.anchor_len;
    let payload_end = payload_start + header.payload_len;

    let anchor = std::str::from_utf8(&src[anchor_start..payload_start])
        .map_err(|_| FrameError::InvalidAnchor)?
        .to_owned();
    let mut trailer = &src[payload_end..frame_len];
    let expected = trailer.get_u16_le();
    let actual = crc16(&src[payload_start..payload_end]);
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    let frame = src.split_to(frame_len).freeze();
    let payload = frame.slice(payload_start..payload_end);
    trace!(
        leader = %header.leader,
        anchor = %anchor,
        len = header.payload_len,
        fin = header.fin,
        "decoded frame"
    );
    Ok(Some(Packet::from_wire(
        header.leader,
        header.fin,
        header.version,
        header.src,
        header.dst,
        anchor,
        payload,
        actual,
        req_crc,
    )))
}

/// Offset of the first plausible frame start in `buf`.
///
/// A tail that is a proper prefix of a valid header counts as plausible, so
/// a frame split across reads is never skipped over.
pub fn next_packet_offset(buf: &[u8], config: &FrameConfig) -> Option<usize> {
    (0..buf.len()).find(|&offset| parse_header(&buf[offset..], config).is_ok())
}
