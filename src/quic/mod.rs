// SPDX-License-Identifier: MPL-2.0

//! QUIC transport: one client connection driven by a dedicated worker thread.
//!
//! The caller-facing [`QuicConnection`] never touches the QUIC state machine
//! directly. It shares queues with the worker ([`engine`]), which owns the UDP
//! socket and the `quinn-proto` connection and is the only place network I/O
//! happens.

pub mod config;
pub mod connection;
pub(crate) mod engine;
pub mod error;
pub(crate) mod shared;
pub mod stream;
pub(crate) mod tls;

use std::fmt;

pub use config::{QuicConfig, QuicConfigBuilder};
pub use connection::QuicConnection;
pub use error::TransportError;

/// Identifier of a QUIC stream as carried on the wire (62-bit varint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Bit 0 clear: opened by the client.
    pub fn is_client_initiated(&self) -> bool {
        self.0 & 0x01 == 0
    }

    /// Bit 1 clear: bidirectional.
    pub fn is_bidirectional(&self) -> bool {
        self.0 & 0x02 == 0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<quinn_proto::StreamId> for StreamId {
    fn from(id: quinn_proto::StreamId) -> Self {
        StreamId(quinn_proto::VarInt::from(id).into_inner())
    }
}

impl TryFrom<StreamId> for quinn_proto::StreamId {
    type Error = TransportError;

    fn try_from(id: StreamId) -> Result<Self, Self::Error> {
        let v = quinn_proto::VarInt::from_u64(id.0).map_err(|_| TransportError::UnknownStream(id))?;
        Ok(quinn_proto::StreamId::from(v))
    }
}

/// Lifecycle of a connection.
///
/// `Idle -> Handshaking -> Connected -> Closing -> Closed`, with `Failed`
/// reachable from `Handshaking` or `Connected`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ConnectionState {
    Idle,
    Handshaking,
    Connected,
    Closing,
    Closed,
    Failed(String),
}

impl ConnectionState {
    /// True once the connection can no longer carry data.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Handshaking => write!(f, "Handshaking"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
            ConnectionState::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_kind_bits() {
        assert!(StreamId(0).is_client_initiated());
        assert!(StreamId(0).is_bidirectional());
        assert!(StreamId(4).is_bidirectional());
        assert!(!StreamId(1).is_client_initiated());
        assert!(!StreamId(2).is_bidirectional());
    }

    #[test]
    fn test_stream_id_quinn_roundtrip() {
        let id = StreamId(8);
        let q = quinn_proto::StreamId::try_from(id).unwrap();
        assert_eq!(StreamId::from(q), id);
        assert!(quinn_proto::StreamId::try_from(StreamId(u64::MAX)).is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Failed("x".into()).is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert_eq!(ConnectionState::Failed("boom".into()).to_string(), "Failed(boom)");
    }
}
