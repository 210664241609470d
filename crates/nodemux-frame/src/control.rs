//! Anchors used by control packets during the node-id handshake.

/// Periodic liveness beacon and node-id claim.
pub const SYNC: &str = "/sync";
/// Sent back when the peer claimed node id 0.
pub const NODEID_ZERO: &str = "/nodeid/zero";
/// Sent back when the claimed node id is already taken.
pub const NODEID_DUP: &str = "/nodeid/dup";
