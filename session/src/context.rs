//! Security-context capability interface.
//!
//! The mutual-authentication provider is consumed as an opaque capability:
//! it drives the cryptographic handshake one peer token at a time and,
//! once established, protects message payloads on the wire. Credential
//! acquisition and the mechanism itself live outside this crate.
//!
//! The context is owned by its session and dropped exactly once when the
//! session ends; disposal is ownership, not an explicit call.

use thiserror::Error;

/// Opaque failure reported by a security-context implementation
#[derive(Error, Debug)]
#[error("{message}")]
pub struct SecurityError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SecurityError {
    /// Create an error from a description
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// A mutual-authentication security context.
///
/// One side drives [`initiate`](SecurityContext::initiate), the other
/// [`accept`](SecurityContext::accept), in lock-step, until
/// [`is_established`](SecurityContext::is_established) reports true.
/// Sessions refuse to exchange messages unless the established context
/// also reports mutual authentication.
pub trait SecurityContext: Send {
    /// Initiator step: feed the last peer token (empty on the first call)
    /// and produce the next token to send, if any.
    fn initiate(&mut self, peer_token: &[u8]) -> Result<Option<Vec<u8>>, SecurityError>;

    /// Acceptor step: feed one peer token and produce the reply token to
    /// send, if any.
    fn accept(&mut self, peer_token: &[u8]) -> Result<Option<Vec<u8>>, SecurityError>;

    /// Whether context establishment has completed
    fn is_established(&self) -> bool;

    /// Whether mutual authentication was achieved
    fn is_mutual(&self) -> bool;

    /// Authenticated initiator principal; valid once established
    fn initiator_principal(&self) -> Result<String, SecurityError>;

    /// Authenticated acceptor principal; valid once established
    fn acceptor_principal(&self) -> Result<String, SecurityError>;

    /// Protect a message payload for the wire
    fn wrap(&mut self, plain: &[u8]) -> Result<Vec<u8>, SecurityError>;

    /// Recover a message payload from its protected form
    fn unwrap(&mut self, sealed: &[u8]) -> Result<Vec<u8>, SecurityError>;
}

/// Authenticated peer identities for one connection.
///
/// Populated once, immediately after the handshake; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Principal name of the client
    pub client_principal: String,
    /// Principal name of the server
    pub server_principal: String,
}
