use std::fmt;

use crate::error::FrameError;

/// Packet kind, carried in the leader byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leader {
    Request,
    Response,
    Publish,
    Subscribe,
    Unsubscribe,
    /// Node-id handshake traffic.
    Control,
}

impl Leader {
    pub const ALL: [Leader; 6] = [
        Self::Request,
        Self::Response,
        Self::Publish,
        Self::Subscribe,
        Self::Unsubscribe,
        Self::Control,
    ];

    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Request => b'>',
            Self::Response => b'<',
            Self::Publish => b'@',
            Self::Subscribe => b'#',
            Self::Unsubscribe => b'%',
            Self::Control => b'=',
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'>' => Some(Self::Request),
            b'<' => Some(Self::Response),
            b'@' => Some(Self::Publish),
            b'#' => Some(Self::Subscribe),
            b'%' => Some(Self::Unsubscribe),
            b'=' => Some(Self::Control),
            _ => None,
        }
    }

    /// Human-readable name for logs and output.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Control => "control",
        }
    }

    /// Only responses carry the request checksum field.
    pub const fn carries_req_crc(self) -> bool {
        matches!(self, Self::Response)
    }
}

impl TryFrom<u8> for Leader {
    type Error = FrameError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_byte(byte).ok_or(FrameError::UnknownLeader(byte))
    }
}

impl fmt::Display for Leader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_distinct_and_reversible() {
        for leader in Leader::ALL {
            assert_eq!(Leader::from_byte(leader.as_byte()), Some(leader));
        }
        let mut bytes: Vec<u8> = Leader::ALL.iter().map(|l| l.as_byte()).collect();
        bytes.sort_unstable();
        bytes.dedup();
        assert_eq!(bytes.len(), Leader::ALL.len());
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert!(matches!(
            Leader::try_from(b'?'),
            Err(FrameError::UnknownLeader(b'?'))
        ));
    }
}
