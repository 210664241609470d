use nodemux_sink::StreamHandle;

/// Errors returned by engine operations.
///
/// Failures observed while polling (a sink that errors, a peer that sends
/// junk) are logged instead and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Sink-level error.
    #[error("sink error: {0}")]
    Sink(#[from] nodemux_sink::SinkError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] nodemux_frame::FrameError),

    /// A sink with this name is already registered.
    #[error("sink {0:?} is already registered")]
    DuplicateSink(String),

    /// No sink with this name is registered.
    #[error("no sink named {0:?}")]
    SinkNotFound(String),

    /// The handle names no live stream.
    #[error("stream {0} not found")]
    StreamNotFound(StreamHandle),

    /// The callback slot is already taken.
    #[error("{slot} callback already registered on stream {handle}")]
    AlreadyRegistered {
        handle: StreamHandle,
        slot: &'static str,
    },

    /// Node id 0 means "unset" and cannot be claimed.
    #[error("node id 0 is reserved")]
    InvalidNodeId,

    /// Listening streams carry no bytes.
    #[error("stream {0} is listening")]
    ListeningStream(StreamHandle),

    /// Neither the given stream nor any peer can take the packet.
    #[error("no route to node 0x{dst:08x}")]
    NoRoute { dst: u32 },
}

pub type Result<T> = std::result::Result<T, EngineError>;
