//! Test doubles for the security-context capability.

use crate::context::{SecurityContext, SecurityError};

const HELLO: &[u8] = b"mock-ctx-hello";
const REPLY: &[u8] = b"mock-ctx-reply";
const SEAL: &[u8] = b"\x1fseal:";

/// Deterministic security context: one token each way to establish, and a
/// reversible tagged wrap. The mutual-authentication flag is configurable
/// so the gate itself can be exercised.
pub struct MockContext {
    established: bool,
    mutual: bool,
    sent_hello: bool,
}

impl MockContext {
    pub fn initiator() -> Self {
        Self {
            established: false,
            mutual: true,
            sent_hello: false,
        }
    }

    pub fn acceptor() -> Self {
        Self {
            established: false,
            mutual: true,
            sent_hello: false,
        }
    }

    /// Report establishment without mutual authentication
    pub fn without_mutual(mut self) -> Self {
        self.mutual = false;
        self
    }
}

impl SecurityContext for MockContext {
    fn initiate(&mut self, peer_token: &[u8]) -> Result<Option<Vec<u8>>, SecurityError> {
        if self.established {
            return Err(SecurityError::new("context already established"));
        }
        if !self.sent_hello {
            if !peer_token.is_empty() {
                return Err(SecurityError::new("unexpected token before hello"));
            }
            self.sent_hello = true;
            return Ok(Some(HELLO.to_vec()));
        }
        if peer_token != REPLY {
            return Err(SecurityError::new("bad acceptor reply"));
        }
        self.established = true;
        Ok(None)
    }

    fn accept(&mut self, peer_token: &[u8]) -> Result<Option<Vec<u8>>, SecurityError> {
        if self.established {
            return Err(SecurityError::new("context already established"));
        }
        if peer_token != HELLO {
            return Err(SecurityError::new("bad initiator hello"));
        }
        self.established = true;
        Ok(Some(REPLY.to_vec()))
    }

    fn is_established(&self) -> bool {
        self.established
    }

    fn is_mutual(&self) -> bool {
        self.established && self.mutual
    }

    fn initiator_principal(&self) -> Result<String, SecurityError> {
        if !self.established {
            return Err(SecurityError::new("context not established"));
        }
        Ok("user@EXAMPLE.ORG".to_string())
    }

    fn acceptor_principal(&self) -> Result<String, SecurityError> {
        if !self.established {
            return Err(SecurityError::new("context not established"));
        }
        Ok("host/server.example.org@EXAMPLE.ORG".to_string())
    }

    fn wrap(&mut self, plain: &[u8]) -> Result<Vec<u8>, SecurityError> {
        if !self.established {
            return Err(SecurityError::new("wrap before establishment"));
        }
        let mut sealed = Vec::with_capacity(SEAL.len() + plain.len());
        sealed.extend_from_slice(SEAL);
        sealed.extend_from_slice(plain);
        Ok(sealed)
    }

    fn unwrap(&mut self, sealed: &[u8]) -> Result<Vec<u8>, SecurityError> {
        if !self.established {
            return Err(SecurityError::new("unwrap before establishment"));
        }
        match sealed.strip_prefix(SEAL) {
            Some(plain) => Ok(plain.to_vec()),
            None => Err(SecurityError::new("sealed payload has no wrap tag")),
        }
    }
}
