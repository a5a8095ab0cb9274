//! Wire protocol framing, message codec, and command fragmentation for remrun.
//!
//! This crate is the pure data layer of the remote-command protocol: no
//! I/O, no security context. It provides token framing, the protocol
//! message codec, and the fragmentation/reassembly scheme that carries
//! arbitrarily large commands across bounded tokens.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8 token type        | bitset, see TokenFlags     |
//! +----------------------+----------------------------+
//! | u32 length           | payload bytes that follow  |
//! +----------------------+----------------------------+
//! | payload              | ctx token or wrapped msg   |
//! +----------------------+----------------------------+
//! ```
//!
//! Each unwrapped payload is one protocol message: a `version, kind`
//! prefix and a kind-specific body (§ message module). COMMAND messages
//! over 64 KiB are split into continuation-coded chunks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fragment;
pub mod message;
pub mod token;

// Re-export main types
pub use error::WireError;
pub use fragment::{
    CommandRequest, ContinuationCode, Fragmenter, ReassemblyMode, Reassembler,
    COMMAND_HEADER_SIZE,
};
pub use message::{
    ErrorCode, Message, MessageKind, OutputStream, MESSAGE_HEADER_SIZE, PROTOCOL_VERSION,
};
pub use token::{
    Token, TokenDecoder, TokenFlags, MAX_TOKEN_DATA, MAX_TOKEN_LENGTH, TOKEN_HEADER_SIZE,
};
