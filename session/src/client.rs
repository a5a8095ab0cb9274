//! Client session for issuing remote commands.

use bytes::Bytes;
use remrun_wire::{
    Fragmenter, Message, OutputStream, TokenFlags, WireError, PROTOCOL_VERSION,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::channel::TokenChannel;
use crate::context::{SecurityContext, SessionIdentity};
use crate::error::SessionError;
use crate::transport::connect_tcp;

/// Terminal result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    /// The remote command completed with this exit code
    Exited(u8),
    /// The server reported an execution or protocol error
    Failed {
        /// Error code, usually one of [`remrun_wire::ErrorCode`]
        code: i32,
        /// Server-provided description
        message: String,
    },
}

/// One authenticated client connection.
///
/// Commands run strictly one at a time: send, then consume the response
/// stream until STATUS or ERROR.
pub struct ClientSession<S, C> {
    channel: TokenChannel<S>,
    context: C,
    identity: SessionIdentity,
    fragmenter: Fragmenter,
    alive: bool,
    closed: bool,
}

impl<C: SecurityContext> ClientSession<TcpStream, C> {
    /// Connect to a server and establish the security context
    pub async fn connect(
        addr: std::net::SocketAddr,
        context: C,
    ) -> Result<Self, SessionError> {
        let stream = connect_tcp(addr).await?;
        Self::establish(stream, context).await
    }
}

impl<S, C> ClientSession<S, C>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: SecurityContext,
{
    /// Establish the security context over an open transport stream
    pub async fn establish(stream: S, mut context: C) -> Result<Self, SessionError> {
        let mut channel = TokenChannel::new(stream);
        let identity = crate::handshake::initiate(&mut channel, &mut context).await?;
        Ok(Self {
            channel,
            context,
            identity,
            fragmenter: Fragmenter::new(),
            alive: true,
            closed: false,
        })
    }

    /// Authenticated identities for this connection
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Run one command, streaming OUTPUT payloads into `sink` as they
    /// arrive.
    ///
    /// With `keep_alive` the connection stays usable for further commands;
    /// otherwise the transport is closed once the command completes.
    pub async fn run<F>(
        &mut self,
        args: &[Bytes],
        keep_alive: bool,
        mut sink: F,
    ) -> Result<CommandStatus, SessionError>
    where
        F: FnMut(OutputStream, &[u8]),
    {
        if !self.alive || self.closed {
            return Err(SessionError::Closed);
        }

        for chunk in self.fragmenter.fragment(args, keep_alive) {
            let sealed = self.context.wrap(&chunk)?;
            self.channel.write_token(TokenFlags::RUN, &sealed).await?;
        }
        self.channel.flush().await?;
        self.alive = keep_alive;
        debug!(args = args.len(), keep_alive, "command sent");

        let status = loop {
            let token = self.channel.read_expected(TokenFlags::RUN).await?;
            let plain = self.context.unwrap(&token.payload)?;
            match Message::decode(&plain)? {
                Message::Output { stream, data } => sink(stream, &data),
                Message::Status { code } => break CommandStatus::Exited(code),
                Message::Error { code, message } => {
                    break CommandStatus::Failed { code, message }
                }
                Message::Version { highest } if highest >= PROTOCOL_VERSION => continue,
                Message::Version { highest } => {
                    // No fallback to older protocols: tear the session down
                    warn!(highest, "peer only speaks an older protocol");
                    let _ = self.close().await;
                    return Err(SessionError::Version(highest));
                }
                other => {
                    return Err(WireError::UnexpectedMessage(kind_byte(&other)).into())
                }
            }
        };

        if !keep_alive {
            self.close().await?;
        }
        Ok(status)
    }

    /// Close the session: send QUIT if the connection is still keep-alive,
    /// then flush and shut the transport down.
    ///
    /// Safe to call on any exit path; a QUIT that cannot be delivered is
    /// logged and the shutdown still proceeds.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.alive {
            self.alive = false;
            if let Err(err) = self.send_quit().await {
                debug!(error = %err, "quit not delivered");
            }
        }
        if !self.closed {
            self.closed = true;
            self.channel.shutdown().await?;
        }
        Ok(())
    }

    async fn send_quit(&mut self) -> Result<(), SessionError> {
        let sealed = self.context.wrap(&Message::Quit.encode())?;
        self.channel.write_token(TokenFlags::RUN, &sealed).await?;
        self.channel.flush().await?;
        Ok(())
    }
}

fn kind_byte(message: &Message) -> u8 {
    match message {
        Message::Command { .. } => remrun_wire::MessageKind::Command as u8,
        Message::Quit => remrun_wire::MessageKind::Quit as u8,
        Message::Output { .. } => remrun_wire::MessageKind::Output as u8,
        Message::Status { .. } => remrun_wire::MessageKind::Status as u8,
        Message::Error { .. } => remrun_wire::MessageKind::Error as u8,
        Message::Version { .. } => remrun_wire::MessageKind::Version as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockContext;

    // Hand-rolled server half: accept the handshake, read one command,
    // answer with the given messages.
    async fn scripted_server(
        stream: tokio::io::DuplexStream,
        replies: Vec<Message>,
    ) -> Result<(), SessionError> {
        let mut channel = TokenChannel::new(stream);
        let mut context = MockContext::acceptor();
        crate::handshake::accept(&mut channel, &mut context).await?;

        let token = channel.read_expected(TokenFlags::RUN).await?;
        context.unwrap(&token.payload)?;
        for message in replies {
            let sealed = context.wrap(&message.encode())?;
            channel.write_token(TokenFlags::RUN, &sealed).await?;
        }
        channel.flush().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_older_peer_version_is_fatal() {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let server_task = tokio::spawn(scripted_server(
            server,
            vec![Message::Version { highest: 1 }],
        ));

        let mut session = ClientSession::establish(client, MockContext::initiator())
            .await
            .unwrap();
        let err = session
            .run(&[Bytes::from_static(b"noop")], true, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Version(1)));

        let _ = server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_equal_version_advertisement_is_ignored() {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let server_task = tokio::spawn(scripted_server(
            server,
            vec![
                Message::Version { highest: 2 },
                Message::Status { code: 0 },
            ],
        ));

        let mut session = ClientSession::establish(client, MockContext::initiator())
            .await
            .unwrap();
        let status = session
            .run(&[Bytes::from_static(b"noop")], true, |_, _| {})
            .await
            .unwrap();
        assert_eq!(status, CommandStatus::Exited(0));

        session.close().await.unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_after_final_command_is_closed() {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let server_task = tokio::spawn(scripted_server(
            server,
            vec![Message::Status { code: 0 }],
        ));

        let mut session = ClientSession::establish(client, MockContext::initiator())
            .await
            .unwrap();
        let status = session
            .run(&[Bytes::from_static(b"last")], false, |_, _| {})
            .await
            .unwrap();
        assert_eq!(status, CommandStatus::Exited(0));

        let err = session
            .run(&[Bytes::from_static(b"again")], true, |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Closed));

        let _ = server_task.await.unwrap();
    }
}
