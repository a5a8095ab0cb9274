//! TCP transport helpers.
//!
//! Sessions run over any `AsyncRead + AsyncWrite` stream; these helpers
//! cover the common TCP case. Listener accept loops and per-connection
//! task spawning are the embedding application's concern.

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// Default remote-command service port
pub const DEFAULT_PORT: u16 = 4373;

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}
