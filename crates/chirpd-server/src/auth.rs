//! Authentication at the front of a connection. The handshake yields an
//! opaque subject string; everything after that is authorization.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

/// Produces the authenticated subject for a new connection, or `None` to
/// reject it.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        stream: &mut BufStream<TcpStream>,
        peer: SocketAddr,
    ) -> std::io::Result<Option<String>>;
}

/// Derives the subject from the peer address with no exchange at all:
/// `hostname:<ip>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressAuth;

#[async_trait]
impl Authenticator for AddressAuth {
    async fn authenticate(
        &self,
        _stream: &mut BufStream<TcpStream>,
        peer: SocketAddr,
    ) -> std::io::Result<Option<String>> {
        Ok(Some(format!("hostname:{}", peer.ip())))
    }
}

/// Accepts a declared identity: the client opens with `subject <name>` and
/// the server acknowledges with `0`. Suitable only behind a trusted
/// perimeter or in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredAuth;

#[async_trait]
impl Authenticator for DeclaredAuth {
    async fn authenticate(
        &self,
        stream: &mut BufStream<TcpStream>,
        peer: SocketAddr,
    ) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        stream.read_line(&mut line).await?;
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("subject"), Some(name)) if !name.is_empty() => {
                stream.write_all(b"0\n").await?;
                stream.flush().await?;
                debug!(%peer, subject = name, "authenticated");
                Ok(Some(name.to_string()))
            }
            _ => {
                stream.write_all(b"-1\n").await?;
                stream.flush().await?;
                debug!(%peer, "authentication rejected");
                Ok(None)
            }
        }
    }
}
