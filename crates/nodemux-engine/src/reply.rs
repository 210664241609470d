use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Type tag that prefixes JSON payloads.
pub const JSON_TAG: &[u8] = b"j:";
/// Type tag that prefixes plain-text payloads.
pub const TEXT_TAG: &[u8] = b"t:";

/// Body of a reply the engine synthesizes on its own.
///
/// Carried as `j:` followed by a JSON object, e.g. `j:{"err":0}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub err: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Reply {
    pub const OK: u32 = 0;
    pub const NOT_SYNCED: u32 = 1;
    pub const NOT_FOUND: u32 = 404;
    pub const INTERNAL: u32 = 500;

    /// Subscribe/unsubscribe acknowledgment.
    pub fn ok() -> Self {
        Self {
            err: Self::OK,
            msg: None,
        }
    }

    pub fn not_synced() -> Self {
        Self::error(Self::NOT_SYNCED, "nodeid not sync")
    }

    pub fn not_found() -> Self {
        Self::error(Self::NOT_FOUND, "Destination not found")
    }

    pub fn internal() -> Self {
        Self::error(Self::INTERNAL, "Internal error")
    }

    fn error(err: u32, msg: &str) -> Self {
        Self {
            err,
            msg: Some(msg.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err == Self::OK
    }

    /// Encode as a tagged payload.
    pub fn to_payload(&self) -> Bytes {
        let body = serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec());
        let mut payload = Vec::with_capacity(JSON_TAG.len() + body.len());
        payload.extend_from_slice(JSON_TAG);
        payload.extend_from_slice(&body);
        Bytes::from(payload)
    }

    /// Parse a tagged payload; `None` if it is not a reply object.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let body = payload.strip_prefix(JSON_TAG)?;
        serde_json::from_slice(body).ok()
    }
}
