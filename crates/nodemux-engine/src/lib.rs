//! Event-driven multiplexing engine for nodemux.
//!
//! One [`Engine`] drives any number of streams opened through registered
//! sinks. Streams with the protocol enabled are parsed into packets, take
//! part in the node-id handshake and are routed: requests and responses by
//! destination node id, publications to every stream subscribed to their
//! topic. Streams without the protocol just see raw bytes through their
//! pollin callback.
//!
//! The engine is single-threaded and not `Send`; confine it to the thread
//! that calls [`Engine::poll`].

mod callback;
pub mod config;
pub mod engine;
pub mod error;
mod handshake;
pub mod message;
pub mod reply;
mod router;
pub mod stream;

pub use callback::Disposition;
pub use config::{EngineConfig, DEFAULT_IDLE_MAX, DEFAULT_SYNC_INTERVAL};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use message::{MessageState, PendingMessage};
pub use reply::Reply;
pub use stream::{HandshakeState, Stream};

pub use nodemux_frame::{Leader, Packet};
pub use nodemux_sink::{Ioctl, Sink, StreamHandle, StreamRole};
