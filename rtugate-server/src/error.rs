//! Server error types.

use thiserror::Error;

/// Server and session errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(#[from] rtugate_protocol::ProtocolError),

    #[error("device offline")]
    DeviceOffline,

    #[error("send timed out")]
    SendTimeout,

    #[error("receive timed out")]
    ReceiveTimeout,

    #[error("read timed out")]
    ReadTimeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether the session is gone (closed, evicted or never found).
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            ServerError::DeviceOffline | ServerError::ConnectionClosed | ServerError::ShuttingDown
        )
    }

    /// Returns whether the operation ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ServerError::SendTimeout
                | ServerError::ReceiveTimeout
                | ServerError::ReadTimeout
                | ServerError::WriteTimeout
        )
    }
}
