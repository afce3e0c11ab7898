//! Loopback helpers for session tests.

use crate::registry::SessionRegistry;
use crate::session::{Session, SessionSettings};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Opens a session over a loopback connection. Returns the session and the
/// device end of the connection.
pub(crate) async fn connect(
    registry: &Arc<SessionRegistry>,
    settings: SessionSettings,
) -> (Arc<Session>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = TcpStream::connect(addr).await.unwrap();
    let (stream, peer) = listener.accept().await.unwrap();

    (registry.open(stream, peer, settings), client)
}
