//! Packet multiplexing with node-id routing and pub/sub over pluggable byte
//! streams.
//!
//! A single-threaded [`engine::Engine`] owns a set of sinks (transports) and
//! the streams they open. Streams with the protocol enabled exchange framed,
//! checksummed packets, learn their peer's node id through a periodic `/sync`
//! handshake, and have requests, responses and publications routed between
//! them.
//!
//! # Crate Structure
//!
//! - [`sink`]: transport abstraction plus the Unix socket and in-memory sinks
//! - [`frame`]: packet wire format, fragmentation and resynchronizing reader
//! - [`engine`]: poll loop, handshake, router and subscriptions

/// Re-export sink types.
pub mod sink {
    pub use nodemux_sink::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nodemux_frame::*;
}

/// Re-export engine types.
pub mod engine {
    pub use nodemux_engine::*;
}
