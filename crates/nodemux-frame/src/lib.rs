//! Packet wire format for nodemux.
//!
//! Every frame carries:
//! - a 2-byte magic (`"NM"`) used to find frame boundaries again after junk
//! - a leader byte naming the packet kind, a final-fragment flag and a version
//! - 32-bit source and destination node ids
//! - a UTF-8 anchor (path or topic) and an opaque payload
//! - a CRC-16 of the payload, plus the request's CRC on responses
//!
//! Payloads larger than one frame are split by [`fragments`] and joined again
//! by [`Reassembler`]. [`PacketReader`] and [`PacketWriter`] hold the per-stream
//! receive and transmit buffers.

pub mod checksum;
pub mod codec;
pub mod control;
pub mod error;
pub mod fragment;
pub mod leader;
pub mod packet;
pub mod reader;
pub mod reassembly;
pub mod writer;

pub use checksum::crc16;
pub use codec::{
    decode_packet, encode_packet, next_packet_offset, FrameConfig, DEFAULT_FRAGMENT_SIZE,
    DEFAULT_MAX_PAYLOAD, DEFAULT_RESYNC_TIMEOUT, HEADER_SIZE, MAGIC, MAX_ANCHOR_LEN,
};
pub use error::{FrameError, Result};
pub use fragment::{fragments, Fragments};
pub use leader::Leader;
pub use packet::{Packet, PROTOCOL_VERSION};
pub use reader::PacketReader;
pub use reassembly::Reassembler;
pub use writer::PacketWriter;
