//! Token framing for the wire protocol.
//!
//! Every unit on the wire is a token: a type byte, a big-endian length
//! word, and an opaque payload. During context establishment the payload
//! is a raw security-context token; afterwards it is a wrapped protocol
//! message.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Maximum plaintext data carried in one run-mode token (64 KiB).
///
/// Commands larger than this are fragmented before wrapping.
pub const MAX_TOKEN_DATA: usize = 65536;

/// Maximum on-wire token length (1 MiB).
///
/// Larger than [`MAX_TOKEN_DATA`] to leave room for security-context wrap
/// expansion around a full-size chunk.
pub const MAX_TOKEN_LENGTH: usize = 1024 * 1024;

/// Token wire overhead: type byte plus length word
pub const TOKEN_HEADER_SIZE: usize = 5;

bitflags! {
    /// Token type bitset
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TokenFlags: u8 {
        /// Carries no protocol data
        const NOOP = 1;
        /// Security-context establishment token
        const CONTEXT = 2;
        /// Wrapped protocol message
        const DATA = 4;
        /// Message integrity code
        const MIC = 8;
        /// A context token follows
        const CONTEXT_NEXT = 16;
        /// Peer should reply with a MIC
        const SEND_MIC = 32;
        /// Protocol version 2 framing
        const PROTOCOL = 64;

        /// Handshake opener sent by the initiator
        const INIT = Self::NOOP.bits() | Self::CONTEXT_NEXT.bits() | Self::PROTOCOL.bits();
        /// Context establishment exchange
        const CTX = Self::CONTEXT.bits() | Self::PROTOCOL.bits();
        /// Steady-state message exchange
        const RUN = Self::DATA.bits() | Self::PROTOCOL.bits();
    }
}

/// One framed token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token type
    pub flags: TokenFlags,
    /// Opaque payload
    pub payload: Bytes,
}

impl Token {
    /// Create a token, enforcing the on-wire length limit
    pub fn new(flags: TokenFlags, payload: Bytes) -> Result<Self, crate::WireError> {
        if payload.len() > MAX_TOKEN_LENGTH {
            return Err(crate::WireError::TokenTooLarge(payload.len()));
        }
        Ok(Self { flags, payload })
    }

    /// Total size of the token when encoded
    pub fn encoded_size(&self) -> usize {
        TOKEN_HEADER_SIZE + self.payload.len()
    }

    /// Encode the token to the wire form
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_size());
        buf.put_u8(self.flags.bits());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }
}

/// Incremental decoder for incoming tokens
#[derive(Debug)]
pub struct TokenDecoder {
    max_length: usize,
}

impl TokenDecoder {
    /// Create a decoder with the default length limit
    pub fn new() -> Self {
        Self {
            max_length: MAX_TOKEN_LENGTH,
        }
    }

    /// Decode one token from a buffer.
    ///
    /// Returns `Ok(None)` until a complete token is buffered; consumed
    /// bytes are removed from `buf`, so back-to-back tokens decode on
    /// successive calls.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Token>, crate::WireError> {
        if buf.len() < TOKEN_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the length before consuming anything
        let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if length > self.max_length {
            return Err(crate::WireError::TokenTooLarge(length));
        }

        if buf.len() < TOKEN_HEADER_SIZE + length {
            return Ok(None);
        }

        let type_byte = buf.get_u8();
        let flags =
            TokenFlags::from_bits(type_byte).ok_or(crate::WireError::TokenType(type_byte))?;
        buf.advance(4);
        let payload = buf.split_to(length).freeze();

        Ok(Some(Token { flags, payload }))
    }
}

impl Default for TokenDecoder {
    fn default() -> Self {
        Self::new()
    }
}
