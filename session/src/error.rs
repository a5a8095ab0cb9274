//! Session error types.

use remrun_wire::WireError;
use thiserror::Error;

use crate::context::SecurityError;

/// Session-level errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Handshake failed or mutual authentication was not achieved
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Protocol framing violation; the connection is unusable
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Peer speaks an older protocol than this implementation supports
    #[error("peer protocol version {0} unsupported")]
    Version(u8),

    /// Security-context operation failed
    #[error("security context: {0}")]
    Security(#[from] SecurityError),

    /// Underlying transport failure
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),

    /// Operation on a session that already closed
    #[error("session closed")]
    Closed,
}
