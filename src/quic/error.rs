// SPDX-License-Identifier: MPL-2.0

use std::io;
use std::time::Duration;

use super::StreamId;

/// Error type for QUIC transport operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Bad or unusable settings: no trust anchors, invalid certificate, unresolvable host.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("Transport I/O error: {0}")]
    Io(String),

    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    #[error("Stream not ready: {0}")]
    StreamNotReady(String),

    #[error("Connection not initialized")]
    ConnectionNotInitialized,

    #[error("Unknown stream {0}")]
    UnknownStream(StreamId),

    #[error("Connection already started")]
    AlreadyStarted,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

impl TransportError {
    /// Errors after which the connection object is gone or unusable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportError::HandshakeTimeout(_)
                | TransportError::HandshakeFailure(_)
                | TransportError::Io(_)
                | TransportError::ProtocolDecode(_)
                | TransportError::ConnectionNotInitialized
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            TransportError::ConnectionNotInitialized.to_string(),
            "Connection not initialized"
        );
        assert_eq!(
            TransportError::UnknownStream(StreamId(4)).to_string(),
            "Unknown stream 4"
        );
        let io_err: TransportError = io::Error::new(io::ErrorKind::AddrInUse, "busy").into();
        assert!(matches!(io_err, TransportError::Io(ref m) if m == "busy"));
    }

    #[test]
    fn test_terminal() {
        assert!(TransportError::HandshakeTimeout(Duration::from_secs(1)).is_terminal());
        assert!(!TransportError::StreamNotReady("x".into()).is_terminal());
    }
}
