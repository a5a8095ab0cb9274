//! Token channel over a byte-stream transport.
//!
//! The channel owns the transport handle exclusively and knows nothing of
//! the protocol above it: it frames outgoing tokens and incrementally
//! decodes incoming ones.

use bytes::BytesMut;
use remrun_wire::{Token, TokenDecoder, TokenFlags, WireError, MAX_TOKEN_LENGTH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SessionError;

const READ_BUF_SIZE: usize = 8192;

/// Reads and writes framed tokens over a transport stream
#[derive(Debug)]
pub struct TokenChannel<S> {
    stream: S,
    decoder: TokenDecoder,
    read_buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TokenChannel<S> {
    /// Take exclusive ownership of a transport stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: TokenDecoder::new(),
            read_buf: BytesMut::with_capacity(READ_BUF_SIZE),
        }
    }

    /// Read the next token, blocking until one is complete.
    ///
    /// EOF mid-stream is a transport error; the protocol ends connections
    /// with QUIT, never a bare close.
    pub async fn read_token(&mut self) -> Result<Token, SessionError> {
        loop {
            if let Some(token) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(token);
            }
            let read = self.stream.read_buf(&mut self.read_buf).await?;
            if read == 0 {
                return Err(SessionError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )));
            }
        }
    }

    /// Read the next token and require the given type.
    ///
    /// A mismatch is a fatal framing error, never retried.
    pub async fn read_expected(&mut self, want: TokenFlags) -> Result<Token, SessionError> {
        let token = self.read_token().await?;
        if token.flags != want {
            return Err(WireError::UnexpectedToken {
                got: token.flags.bits(),
                want: want.bits(),
            }
            .into());
        }
        Ok(token)
    }

    /// Frame and write one token
    pub async fn write_token(
        &mut self,
        flags: TokenFlags,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        if payload.len() > MAX_TOKEN_LENGTH {
            return Err(WireError::TokenTooLarge(payload.len()).into());
        }
        let mut buf = BytesMut::with_capacity(remrun_wire::TOKEN_HEADER_SIZE + payload.len());
        let token = Token::new(flags, payload.to_vec().into())?;
        token.encode(&mut buf);
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    /// Flush buffered writes to the transport
    pub async fn flush(&mut self) -> Result<(), SessionError> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Flush and shut the write half of the transport down
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
