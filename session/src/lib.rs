//! Security-context handshake, token channel, and command sessions for remrun.
//!
//! This crate orchestrates the wire layer into working client and server
//! sessions. The mutual-authentication provider is injected behind the
//! [`SecurityContext`] trait; the command executor behind
//! [`CommandDispatcher`]. Each connection is one session driven by one
//! task, strictly half-duplex: handshake tokens in lock-step, then one
//! command and its response stream at a time.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use remrun_session::{ClientSession, SecurityContext};
//!
//! # async fn example<C: SecurityContext>(context: C) -> Result<(), remrun_session::SessionError> {
//! let addr = "127.0.0.1:4373".parse().unwrap();
//! let mut session = ClientSession::connect(addr, context).await?;
//!
//! let status = session
//!     .run(
//!         &[Bytes::from_static(b"echo"), Bytes::from_static(b"hi")],
//!         false,
//!         |stream, data| println!("{:?}: {}", stream, String::from_utf8_lossy(data)),
//!     )
//!     .await?;
//! println!("command ended: {:?}", status);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod client;
pub mod context;
pub mod error;
pub mod handshake;
pub mod server;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use channel::TokenChannel;
pub use client::{ClientSession, CommandStatus};
pub use context::{SecurityContext, SecurityError, SessionIdentity};
pub use error::SessionError;
pub use server::{CommandDispatcher, CommandOutput, ServerConfig, ServerSession};
pub use transport::{connect_tcp, listen_tcp, DEFAULT_PORT};
