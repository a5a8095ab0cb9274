//! Protocol message encoding and decoding.
//!
//! A message is the plaintext carried by one run-mode token: a two-byte
//! prefix (protocol version, message kind) followed by a kind-specific
//! body. All integers are big-endian. COMMAND messages larger than one
//! token are fragmented by [`crate::Fragmenter`]; the codec here only
//! produces and accepts the single-chunk (WHOLE) form.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::fragment::ContinuationCode;

/// Protocol version spoken by this implementation
pub const PROTOCOL_VERSION: u8 = 2;

/// Fixed prefix of every message: version byte and kind byte
pub const MESSAGE_HEADER_SIZE: usize = 2;

/// Message kinds
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Command request (client to server)
    Command = 1,
    /// Clean connection termination (client to server)
    Quit = 2,
    /// Streamed command output (server to client)
    Output = 3,
    /// Command exit status (server to client)
    Status = 4,
    /// Protocol or execution error (server to client)
    Error = 5,
    /// Highest protocol version supported (server to client)
    Version = 6,
}

impl TryFrom<u8> for MessageKind {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, crate::WireError> {
        match value {
            1 => Ok(MessageKind::Command),
            2 => Ok(MessageKind::Quit),
            3 => Ok(MessageKind::Output),
            4 => Ok(MessageKind::Status),
            5 => Ok(MessageKind::Error),
            6 => Ok(MessageKind::Version),
            _ => Err(crate::WireError::Kind(value)),
        }
    }
}

/// Output stream identifiers
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    /// Remote standard output
    Stdout = 1,
    /// Remote standard error
    Stderr = 2,
}

impl TryFrom<u8> for OutputStream {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, crate::WireError> {
        match value {
            1 => Ok(OutputStream::Stdout),
            2 => Ok(OutputStream::Stderr),
            _ => Err(crate::WireError::Stream(value)),
        }
    }
}

/// Standard server error codes carried in ERROR messages
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Internal server failure
    Internal = 1,
    /// Invalid token received
    BadToken = 2,
    /// Unknown message kind
    UnknownMessage = 3,
    /// Malformed command token
    BadCommand = 4,
    /// Command not recognized by the server
    UnknownCommand = 5,
    /// Caller not authorized for this command
    Access = 6,
    /// Argument count over the server limit
    TooManyArgs = 7,
    /// Command data over the server limit
    TooMuchData = 8,
}

impl ErrorCode {
    /// Wire value of the code
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// One decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Command request
    Command {
        /// Whether the connection stays open after this command
        keep_alive: bool,
        /// Argument vector, first entry included
        args: Vec<Bytes>,
    },
    /// Clean termination
    Quit,
    /// Streamed output
    Output {
        /// Which remote stream produced the bytes
        stream: OutputStream,
        /// Output bytes
        data: Bytes,
    },
    /// Command completed with an exit status
    Status {
        /// Exit code of the remote command
        code: u8,
    },
    /// Protocol or execution error
    Error {
        /// Error code, usually one of [`ErrorCode`]
        code: i32,
        /// Human-readable description
        message: String,
    },
    /// Version advertisement
    Version {
        /// Highest protocol version the sender supports
        highest: u8,
    },
}

impl Message {
    /// Encode the message to its plaintext wire form
    pub fn encode(&self) -> Bytes {
        match self {
            Message::Command { keep_alive, args } => {
                crate::fragment::encode_command(args, *keep_alive).freeze()
            }
            Message::Quit => {
                let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE);
                buf.put_u8(PROTOCOL_VERSION);
                buf.put_u8(MessageKind::Quit as u8);
                buf.freeze()
            }
            Message::Output { stream, data } => {
                let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + 5 + data.len());
                buf.put_u8(PROTOCOL_VERSION);
                buf.put_u8(MessageKind::Output as u8);
                buf.put_u8(*stream as u8);
                buf.put_i32(data.len() as i32);
                buf.put_slice(data);
                buf.freeze()
            }
            Message::Status { code } => {
                let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + 1);
                buf.put_u8(PROTOCOL_VERSION);
                buf.put_u8(MessageKind::Status as u8);
                buf.put_u8(*code);
                buf.freeze()
            }
            Message::Error { code, message } => {
                let text = message.as_bytes();
                let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + 8 + text.len());
                buf.put_u8(PROTOCOL_VERSION);
                buf.put_u8(MessageKind::Error as u8);
                buf.put_i32(*code);
                buf.put_i32(text.len() as i32);
                buf.put_slice(text);
                buf.freeze()
            }
            Message::Version { highest } => {
                let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + 1);
                buf.put_u8(PROTOCOL_VERSION);
                buf.put_u8(MessageKind::Version as u8);
                buf.put_u8(*highest);
                buf.freeze()
            }
        }
    }

    /// Decode a complete message from its plaintext wire form.
    ///
    /// A fragmented COMMAND (any continuation other than WHOLE) is not a
    /// complete message and is rejected; the server feeds those chunks to
    /// [`crate::Reassembler`] instead.
    pub fn decode(payload: &[u8]) -> Result<Message, crate::WireError> {
        if payload.len() < MESSAGE_HEADER_SIZE {
            return Err(crate::WireError::Truncated);
        }
        let version = payload[0];
        if version != PROTOCOL_VERSION {
            return Err(crate::WireError::Version(version));
        }
        let kind = MessageKind::try_from(payload[1])?;
        let mut body = Bytes::copy_from_slice(&payload[MESSAGE_HEADER_SIZE..]);

        match kind {
            MessageKind::Command => {
                if body.remaining() < 2 {
                    return Err(crate::WireError::Truncated);
                }
                let keep_alive = body.get_u8() != 0;
                let code = ContinuationCode::try_from(body.get_u8())?;
                if code != ContinuationCode::Whole {
                    return Err(crate::WireError::ContinuationSequence);
                }
                let args = parse_argv(&mut body)?;
                Ok(Message::Command { keep_alive, args })
            }
            MessageKind::Quit => {
                if body.has_remaining() {
                    return Err(crate::WireError::TrailingData);
                }
                Ok(Message::Quit)
            }
            MessageKind::Output => {
                if body.remaining() < 5 {
                    return Err(crate::WireError::Truncated);
                }
                let stream = OutputStream::try_from(body.get_u8())?;
                let length = body.get_i32();
                if length < 0 {
                    return Err(crate::WireError::Length);
                }
                if body.remaining() != length as usize {
                    return Err(crate::WireError::TrailingData);
                }
                Ok(Message::Output { stream, data: body })
            }
            MessageKind::Status => {
                if body.remaining() < 1 {
                    return Err(crate::WireError::Truncated);
                }
                let code = body.get_u8();
                if body.has_remaining() {
                    return Err(crate::WireError::TrailingData);
                }
                Ok(Message::Status { code })
            }
            MessageKind::Error => {
                if body.remaining() < 8 {
                    return Err(crate::WireError::Truncated);
                }
                let code = body.get_i32();
                let length = body.get_i32();
                if length < 0 {
                    return Err(crate::WireError::Length);
                }
                if body.remaining() != length as usize {
                    return Err(crate::WireError::TrailingData);
                }
                let message = String::from_utf8_lossy(&body).into_owned();
                Ok(Message::Error { code, message })
            }
            MessageKind::Version => {
                if body.remaining() < 1 {
                    return Err(crate::WireError::Truncated);
                }
                let highest = body.get_u8();
                if body.has_remaining() {
                    return Err(crate::WireError::TrailingData);
                }
                Ok(Message::Version { highest })
            }
        }
    }
}

/// Parse a command argument vector: `argc: i32` then `argc` length-prefixed
/// byte strings, consuming the buffer exactly.
pub(crate) fn parse_argv(body: &mut Bytes) -> Result<Vec<Bytes>, crate::WireError> {
    if body.remaining() < 4 {
        return Err(crate::WireError::Truncated);
    }
    let argc = body.get_i32();
    if argc < 0 {
        return Err(crate::WireError::Length);
    }

    // Capacity comes from the peer; let the Vec grow instead of trusting it
    let mut args = Vec::new();
    for _ in 0..argc {
        if body.remaining() < 4 {
            return Err(crate::WireError::Truncated);
        }
        let length = body.get_i32();
        if length < 0 {
            return Err(crate::WireError::Length);
        }
        if body.remaining() < length as usize {
            return Err(crate::WireError::Truncated);
        }
        args.push(body.split_to(length as usize));
    }
    if body.has_remaining() {
        return Err(crate::WireError::TrailingData);
    }
    Ok(args)
}
