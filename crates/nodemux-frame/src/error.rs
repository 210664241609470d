/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with the expected magic bytes.
    #[error("invalid magic bytes")]
    InvalidMagic,

    /// The leader byte names no known packet kind.
    #[error("unknown leader byte 0x{0:02x}")]
    UnknownLeader(u8),

    /// Reserved flag bits are set.
    #[error("invalid flags 0x{0:02x}")]
    InvalidFlags(u8),

    /// The frame was written by an incompatible protocol version.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The anchor exceeds the maximum allowed length.
    #[error("anchor too long: {len} bytes (max {max})")]
    AnchorTooLong { len: usize, max: usize },

    /// The payload exceeds the maximum allowed size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The anchor bytes are not valid UTF-8.
    #[error("anchor is not valid UTF-8")]
    InvalidAnchor,

    /// The payload checksum does not match the trailer.
    #[error("checksum mismatch: expected 0x{expected:04x}, computed 0x{actual:04x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// A frame cannot continue the partial packet it was appended to.
    #[error("fragment does not continue the pending packet")]
    FragmentMismatch,
}

pub type Result<T> = std::result::Result<T, FrameError>;
