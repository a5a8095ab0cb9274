//! Server session: accepts commands and drives the dispatcher.
//!
//! One session serves one accepted connection, strictly sequentially:
//! handshake, then a run loop that reassembles commands, invokes the
//! injected dispatcher, and streams its output back. Protocol errors the
//! server can detect are reported to the client as ERROR messages before
//! the connection is torn down, so the caller sees a diagnosable failure
//! instead of a bare disconnect.

use async_trait::async_trait;
use bytes::Bytes;
use remrun_wire::{
    CommandRequest, ErrorCode, Message, MessageKind, OutputStream, Reassembler, TokenFlags,
    WireError, MAX_TOKEN_DATA, MESSAGE_HEADER_SIZE, PROTOCOL_VERSION,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::channel::TokenChannel;
use crate::context::{SecurityContext, SessionIdentity};
use crate::error::SessionError;

/// Limits enforced before a command reaches the dispatcher
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum accepted argument count per command
    pub max_args: usize,
    /// Maximum reassembled command size in bytes
    pub max_data: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_args: 4096,
            max_data: 16 * 1024 * 1024,
        }
    }
}

/// Output channel handed to the dispatcher while a command runs.
///
/// Both methods are no-ops once the command has completed (an error was
/// already reported); emitting zero-length output is a no-op as well.
#[async_trait]
pub trait CommandOutput: Send {
    /// Stream bytes to the client on the given stream
    async fn output(&mut self, stream: OutputStream, data: &[u8]) -> Result<(), SessionError>;

    /// Report the command as failed; suppresses the final STATUS message
    async fn error(&mut self, code: i32, message: &str) -> Result<(), SessionError>;
}

/// Executes one parsed command.
///
/// Invoked synchronously per command; the return value becomes the STATUS
/// exit code unless an error was emitted. A dispatcher failure is reported
/// to the client as an internal error.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Run the command for the authenticated peer
    async fn dispatch(
        &self,
        identity: &SessionIdentity,
        args: &[Bytes],
        output: &mut dyn CommandOutput,
    ) -> anyhow::Result<i32>;
}

/// One accepted server-side connection
pub struct ServerSession<S, C> {
    channel: TokenChannel<S>,
    context: C,
    config: ServerConfig,
}

impl<S, C> ServerSession<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: SecurityContext,
{
    /// Serve one connection to completion.
    ///
    /// Accepts the handshake, then loops on commands until QUIT, loss of
    /// keep-alive, or a fatal error. The transport is flushed and shut
    /// down unconditionally on exit; the security context is dropped with
    /// the session.
    pub async fn serve<D>(
        stream: S,
        mut context: C,
        config: ServerConfig,
        dispatcher: &D,
    ) -> Result<(), SessionError>
    where
        D: CommandDispatcher + ?Sized,
    {
        let mut channel = TokenChannel::new(stream);
        let identity = crate::handshake::accept(&mut channel, &mut context).await?;
        info!(
            client = %identity.client_principal,
            server = %identity.server_principal,
            "session established"
        );

        let mut session = Self {
            channel,
            context,
            config,
        };
        let result = session.run_loop(&identity, dispatcher).await;
        if let Err(ref err) = result {
            warn!(error = %err, "session ended with error");
        }
        let _ = session.channel.shutdown().await;
        result
    }

    async fn run_loop<D>(
        &mut self,
        identity: &SessionIdentity,
        dispatcher: &D,
    ) -> Result<(), SessionError>
    where
        D: CommandDispatcher + ?Sized,
    {
        let mut reassembler = Reassembler::new();
        let mut keep_alive = true;

        while keep_alive {
            let token = self.channel.read_expected(TokenFlags::RUN).await?;
            let plain = self.context.unwrap(&token.payload)?;

            if plain.len() < MESSAGE_HEADER_SIZE {
                let _ = self
                    .send_error(ErrorCode::BadCommand, "Invalid command token")
                    .await;
                return Err(WireError::Truncated.into());
            }

            if plain[0] != PROTOCOL_VERSION {
                // Advertise the highest version we speak; a partial
                // command from the foreign-version peer is void.
                debug!(version = plain[0], "message with foreign protocol version");
                reassembler.reset();
                self.send_message(&Message::Version {
                    highest: PROTOCOL_VERSION,
                })
                .await?;
                continue;
            }

            let kind = match MessageKind::try_from(plain[1]) {
                Ok(kind) => kind,
                Err(err) => {
                    let _ = self
                        .send_error(ErrorCode::UnknownMessage, "Unknown message")
                        .await;
                    return Err(err.into());
                }
            };

            match kind {
                MessageKind::Quit => {
                    if plain.len() > MESSAGE_HEADER_SIZE {
                        return Err(WireError::TrailingData.into());
                    }
                    debug!("quit received, closing connection");
                    break;
                }
                MessageKind::Command => {
                    if plain.len() > MAX_TOKEN_DATA {
                        let _ = self.send_error(ErrorCode::TooMuchData, "Too much data").await;
                        return Err(WireError::TokenTooLarge(plain.len()).into());
                    }
                    match reassembler.push(&plain[MESSAGE_HEADER_SIZE..]) {
                        Ok(None) => {
                            if reassembler.buffered() > self.config.max_data {
                                let _ = self
                                    .send_error(ErrorCode::TooMuchData, "Too much data")
                                    .await;
                                return Err(
                                    WireError::TokenTooLarge(reassembler.buffered()).into()
                                );
                            }
                        }
                        Ok(Some(command)) => {
                            keep_alive = command.keep_alive;
                            if command.args.len() > self.config.max_args {
                                warn!(args = command.args.len(), "argument count over limit");
                                self.send_error(ErrorCode::TooManyArgs, "Too many arguments")
                                    .await?;
                                continue;
                            }
                            self.dispatch_command(identity, command, dispatcher).await?;
                        }
                        Err(err) => {
                            let _ = self
                                .send_error(ErrorCode::BadCommand, "Invalid command token")
                                .await;
                            return Err(err.into());
                        }
                    }
                }
                other => {
                    let _ = self
                        .send_error(ErrorCode::UnknownMessage, "Unknown message")
                        .await;
                    return Err(WireError::UnexpectedMessage(other as u8).into());
                }
            }
        }
        Ok(())
    }

    async fn dispatch_command<D>(
        &mut self,
        identity: &SessionIdentity,
        command: CommandRequest,
        dispatcher: &D,
    ) -> Result<(), SessionError>
    where
        D: CommandDispatcher + ?Sized,
    {
        debug!(
            args = command.args.len(),
            keep_alive = command.keep_alive,
            "dispatching command"
        );

        let (outcome, failed) = {
            let mut responder = CommandResponder {
                channel: &mut self.channel,
                context: &mut self.context,
                completed: false,
            };
            let outcome = dispatcher
                .dispatch(identity, &command.args, &mut responder)
                .await;
            (outcome, responder.completed)
        };

        match outcome {
            Ok(code) => {
                if !failed {
                    self.send_message(&Message::Status { code: code as u8 }).await?;
                }
            }
            Err(err) => {
                warn!(error = %err, "dispatcher failed");
                if !failed {
                    self.send_message(&Message::Error {
                        code: ErrorCode::Internal.code(),
                        message: err.to_string(),
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn send_message(&mut self, message: &Message) -> Result<(), SessionError> {
        send(&mut self.channel, &mut self.context, message).await
    }

    async fn send_error(&mut self, code: ErrorCode, message: &str) -> Result<(), SessionError> {
        self.send_message(&Message::Error {
            code: code.code(),
            message: message.to_string(),
        })
        .await
    }
}

// Wrap and write one message; shared by the session and the responder.
async fn send<S, C>(
    channel: &mut TokenChannel<S>,
    context: &mut C,
    message: &Message,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: SecurityContext,
{
    let sealed = context.wrap(&message.encode())?;
    channel.write_token(TokenFlags::RUN, &sealed).await?;
    channel.flush().await
}

struct CommandResponder<'a, S, C> {
    channel: &'a mut TokenChannel<S>,
    context: &'a mut C,
    completed: bool,
}

#[async_trait]
impl<'a, S, C> CommandOutput for CommandResponder<'a, S, C>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: SecurityContext,
{
    async fn output(&mut self, stream: OutputStream, data: &[u8]) -> Result<(), SessionError> {
        if self.completed || data.is_empty() {
            return Ok(());
        }
        send(
            self.channel,
            self.context,
            &Message::Output {
                stream,
                data: Bytes::copy_from_slice(data),
            },
        )
        .await
    }

    async fn error(&mut self, code: i32, message: &str) -> Result<(), SessionError> {
        if self.completed {
            return Ok(());
        }
        self.completed = true;
        send(
            self.channel,
            self.context,
            &Message::Error {
                code,
                message: message.to_string(),
            },
        )
        .await
    }
}
