use std::time::Instant;

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::codec::{decode_packet, next_packet_offset, FrameConfig};
use crate::packet::Packet;
use crate::reassembly::Reassembler;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const PREVIEW_LEN: usize = 48;

/// Receive side of one stream: buffered bytes, resynchronization and
/// reassembly.
///
/// The reader never blocks and never fails. Bytes that cannot start a frame
/// are skipped up to the next plausible frame start; when no plausible start
/// exists the buffer is held until `resync_timeout` has passed since the last
/// arrival. Each timed-out call then drops the stuck bytes up to the next
/// plausible frame start in one step and stops until the following cycle.
#[derive(Debug)]
pub struct PacketReader {
    buf: BytesMut,
    reassembler: Reassembler,
    config: FrameConfig,
    last_arrival: Option<Instant>,
    discarded: u64,
}

impl Default for PacketReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketReader {
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            reassembler: Reassembler::default(),
            config,
            last_arrival: None,
            discarded: 0,
        }
    }

    /// Append newly arrived bytes.
    pub fn extend(&mut self, data: &[u8], now: Instant) {
        self.buf.extend_from_slice(data);
        self.last_arrival = Some(now);
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop up to `n` bytes from the front; returns how many were dropped.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
        n
    }

    /// Move buffered bytes into `out`, returning how many were copied.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.buf.advance(n);
        n
    }

    /// Whether held bytes have waited long enough to be force-discarded.
    pub fn resync_due(&self, now: Instant) -> bool {
        !self.buf.is_empty()
            && self
                .last_arrival
                .is_none_or(|at| now.saturating_duration_since(at) >= self.config.resync_timeout)
    }

    /// Decode the next complete packet, resynchronizing past junk.
    pub fn next_packet(&mut self, now: Instant) -> Option<Packet> {
        loop {
            if self.buf.is_empty() {
                return None;
            }

            match next_packet_offset(&self.buf, &self.config) {
                Some(0) => {}
                Some(offset) => self.skip(offset, "broken packet skipped"),
                None if self.resync_due(now) => {
                    self.resync_skip("unparseable bytes dropped after resync timeout");
                    return None;
                }
                None => return None,
            }

            match decode_packet(&mut self.buf, &self.config) {
                Ok(Some(frame)) => {
                    if let Some(packet) = self.reassembler.push(frame) {
                        trace!(
                            leader = %packet.leader(),
                            anchor = packet.anchor(),
                            len = packet.payload().len(),
                            "packet complete"
                        );
                        return Some(packet);
                    }
                }
                Ok(None) if self.resync_due(now) => {
                    self.resync_skip("incomplete packet dropped after resync timeout");
                    return None;
                }
                Ok(None) => return None,
                Err(err) => {
                    warn!(error = %err, "malformed packet");
                    self.skip(1, "broken packet skipped");
                }
            }
        }
    }

    /// Total bytes dropped while resynchronizing.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// The fragmented packet currently being reassembled.
    pub fn partial(&self) -> Option<&Packet> {
        self.reassembler.partial()
    }

    pub fn last_arrival(&self) -> Option<Instant> {
        self.last_arrival
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Drop the head byte and everything up to the next plausible frame
    /// start after it.
    fn resync_skip(&mut self, reason: &'static str) {
        let rest = self.buf.len().saturating_sub(1);
        let next = self
            .buf
            .get(1..)
            .and_then(|tail| next_packet_offset(tail, &self.config))
            .unwrap_or(rest);
        self.skip(1 + next, reason);
    }

    fn skip(&mut self, n: usize, reason: &'static str) {
        let n = n.min(self.buf.len());
        warn!(
            discarded = n,
            preview = %printable(&self.buf[..n]),
            "{reason}"
        );
        self.buf.advance(n);
        self.discarded += n as u64;
    }
}

fn printable(bytes: &[u8]) -> String {
    let mut out = String::new();
    for &byte in bytes.iter().take(PREVIEW_LEN) {
        if byte.is_ascii_graphic() || byte == b' ' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("\\x{byte:02x}"));
        }
    }
    if bytes.len() > PREVIEW_LEN {
        out.push_str("...");
    }
    out
}
