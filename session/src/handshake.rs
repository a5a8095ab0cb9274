//! Security-context handshake.
//!
//! Both roles exchange typed tokens in lock-step until the context
//! reports established, then confirm that mutual authentication actually
//! occurred before any message exchange is allowed.

use remrun_wire::{TokenFlags, WireError};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::channel::TokenChannel;
use crate::context::{SecurityContext, SessionIdentity};
use crate::error::SessionError;

/// Drive context establishment as the initiator.
///
/// Sends the empty INIT token, then loops: step the context with the last
/// peer token, send whatever it produces tagged CTX, and read the peer's
/// next CTX token while the context is not yet established.
pub async fn initiate<S, C>(
    channel: &mut TokenChannel<S>,
    context: &mut C,
) -> Result<SessionIdentity, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: SecurityContext,
{
    channel.write_token(TokenFlags::INIT, &[]).await?;
    channel.flush().await?;

    let mut peer_token = Vec::new();
    loop {
        if let Some(token) = context.initiate(&peer_token)? {
            channel.write_token(TokenFlags::CTX, &token).await?;
            channel.flush().await?;
        }
        if context.is_established() {
            break;
        }
        peer_token = channel
            .read_expected(TokenFlags::CTX)
            .await?
            .payload
            .to_vec();
    }

    let identity = confirm_mutual(context)?;
    debug!(
        client = %identity.client_principal,
        server = %identity.server_principal,
        "security context established"
    );
    Ok(identity)
}

/// Drive context establishment as the acceptor.
///
/// The first token must be INIT with an empty payload; each CTX token is
/// then fed to the context's accept step until establishment.
pub async fn accept<S, C>(
    channel: &mut TokenChannel<S>,
    context: &mut C,
) -> Result<SessionIdentity, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: SecurityContext,
{
    let init = channel.read_expected(TokenFlags::INIT).await?;
    if !init.payload.is_empty() {
        return Err(WireError::NonEmptyInit.into());
    }

    loop {
        let peer = channel.read_expected(TokenFlags::CTX).await?;
        if let Some(reply) = context.accept(&peer.payload)? {
            channel.write_token(TokenFlags::CTX, &reply).await?;
            channel.flush().await?;
        }
        if context.is_established() {
            break;
        }
    }

    let identity = confirm_mutual(context)?;
    debug!(
        client = %identity.client_principal,
        server = %identity.server_principal,
        "security context accepted"
    );
    Ok(identity)
}

// The gate: an established context without mutual authentication fails the
// session before any command is accepted.
fn confirm_mutual<C: SecurityContext>(context: &C) -> Result<SessionIdentity, SessionError> {
    if !context.is_mutual() {
        return Err(SessionError::Authentication(
            "mutual authentication not achieved".to_string(),
        ));
    }
    Ok(SessionIdentity {
        client_principal: context.initiator_principal()?,
        server_principal: context.acceptor_principal()?,
    })
}
