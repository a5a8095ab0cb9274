//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Token length field exceeds the on-wire limit
    #[error("token length {0} exceeds limit")]
    TokenTooLarge(usize),

    /// Token type byte carries bits outside the defined set
    #[error("unknown token type {0:#04x}")]
    TokenType(u8),

    /// Token type does not match the current protocol state
    #[error("unexpected token type {got:#04x}, expected {want:#04x}")]
    UnexpectedToken {
        /// Type byte received from the peer
        got: u8,
        /// Type byte the current state requires
        want: u8,
    },

    /// Initial handshake token carried a payload
    #[error("initial handshake token carried data")]
    NonEmptyInit,

    /// Unsupported protocol version
    #[error("protocol version {0} unsupported")]
    Version(u8),

    /// Unknown message kind
    #[error("unknown message kind {0}")]
    Kind(u8),

    /// Message kind is valid but not allowed in the current direction/state
    #[error("unexpected message kind {0}")]
    UnexpectedMessage(u8),

    /// Unknown output stream identifier
    #[error("unknown output stream {0}")]
    Stream(u8),

    /// Continuation code byte outside 0..=3
    #[error("invalid continuation code {0}")]
    Continuation(u8),

    /// Continuation code not valid for the current reassembly state
    #[error("command continuation out of sequence")]
    ContinuationSequence,

    /// Message body shorter than its declared layout
    #[error("truncated message body")]
    Truncated,

    /// Bytes left over after the declared message contents
    #[error("trailing bytes after message body")]
    TrailingData,

    /// Negative length field in a message body
    #[error("negative length field")]
    Length,
}
