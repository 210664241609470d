use std::fmt;
use std::io;

use nodemux_engine::{EngineError, Reply};
use nodemux_frame::FrameError;
use nodemux_sink::SinkError;

// sysexits-flavoured exit codes.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const REMOTE_ERROR: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn sink_error(context: &str, err: SinkError) -> CliError {
    match err {
        SinkError::Bind { source, .. }
        | SinkError::Connect { source, .. }
        | SinkError::Accept(source)
        | SinkError::Io(source) => io_error(context, source),
        SinkError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        SinkError::AddrInUse(_) | SinkError::ConnectionRefused(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::PayloadTooLarge { .. }
        | FrameError::AnchorTooLong { .. }
        | FrameError::InvalidAnchor => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn engine_error(context: &str, err: EngineError) -> CliError {
    match err {
        EngineError::Sink(err) => sink_error(context, err),
        EngineError::Frame(err) => frame_error(context, err),
        EngineError::InvalidNodeId => CliError::new(USAGE, format!("{context}: {err}")),
        EngineError::NoRoute { .. } | EngineError::StreamNotFound(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

/// Error replies synthesized by the hub surface as [`REMOTE_ERROR`].
pub fn reply_error(context: &str, reply: &Reply) -> CliError {
    let message = reply.msg.as_deref().unwrap_or("no message");
    CliError::new(
        REMOTE_ERROR,
        format!("{context}: remote error {}: {message}", reply.err),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connect_is_a_plain_failure() {
        let err = sink_error(
            "connect failed",
            SinkError::ConnectionRefused("/tmp/x.sock".to_string()),
        );
        assert_eq!(err.code, FAILURE);
        assert!(err.message.starts_with("connect failed: "));
    }

    #[test]
    fn oversized_payload_is_invalid_data() {
        let err = engine_error(
            "send failed",
            EngineError::Frame(FrameError::AnchorTooLong { len: 2000, max: 1024 }),
        );
        assert_eq!(err.code, DATA_INVALID);
    }

    #[test]
    fn permission_denied_maps_through_sink() {
        let err = engine_error(
            "bind failed",
            EngineError::Sink(SinkError::Io(io::Error::from(io::ErrorKind::PermissionDenied))),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }

    #[test]
    fn reply_error_carries_code_and_message() {
        let err = reply_error("request failed", &Reply::not_found());
        assert_eq!(err.code, REMOTE_ERROR);
        assert_eq!(
            err.message,
            "request failed: remote error 404: Destination not found"
        );
    }
}
