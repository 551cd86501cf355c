// SPDX-License-Identifier: MPL-2.0

//! Errors surfaced by [`MqttSession`](crate::MqttSession).
//!
//! Transport and codec failures are wrapped; MQTT-level outcomes (refused
//! CONNECT, negative acknowledgements, timeouts) get their own variants. The
//! `is_*`/`should_*` helpers tell a caller whether retrying the call or
//! building a new connection can help.

use std::time::Duration;

use crate::mqtt_serde::parser::ParseError;
use crate::quic::TransportError;

/// Bytes of the offending input kept on a parse failure.
const RAW_DATA_LIMIT: usize = 100;
/// Bytes of that input shown in the message.
const RAW_PREVIEW: usize = 20;

#[derive(Debug, Clone, serde::Serialize, thiserror::Error)]
pub enum MqttClientError {
    /// CONNACK carried a non-success code.
    #[error("Connection refused by broker: {description} (code: 0x{reason_code:02X})")]
    ConnectionRefused { reason_code: u8, description: String },

    #[error("Connection to broker lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("QUIC transport error: {message}")]
    Transport {
        #[serde(skip)]
        error: TransportError,
        message: String,
    },

    #[error("MQTT protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Failed to parse MQTT packet: {parse_error}{}", raw_preview(.raw_data))]
    PacketParsing { parse_error: String, raw_data: Vec<u8> },

    #[error("Expected {expected} packet, received {received}")]
    UnexpectedPacket { expected: String, received: String },

    #[error("No free packet identifier: 65535 requests awaiting acknowledgement")]
    PacketIdExhausted,

    #[error("Operation '{operation}' timed out after {timeout_ms} ms")]
    OperationTimeout { operation: String, timeout_ms: u64 },

    #[error(
        "Publish failed{} - code: 0x{:02X}{}",
        packet_id_suffix(.packet_id),
        .reason_code,
        reason_suffix(.reason_string)
    )]
    PublishFailed {
        packet_id: Option<u16>,
        reason_code: u8,
        reason_string: Option<String>,
    },

    #[error("Subscribe failed for {topics:?} with reason codes {reason_codes:02X?}")]
    SubscribeFailed {
        topics: Vec<String>,
        reason_codes: Vec<u8>,
    },

    #[error("Unsubscribe failed for {topics:?} with reason codes {reason_codes:02X?}")]
    UnsubscribeFailed {
        topics: Vec<String>,
        reason_codes: Vec<u8>,
    },

    /// Caller input the protocol cannot carry: QoS 2, oversized strings.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidConfiguration { field: String, reason: String },
}

pub type MqttClientResult<T> = Result<T, MqttClientError>;

fn raw_preview(raw: &[u8]) -> String {
    match raw.len() {
        0 => String::new(),
        n if n > RAW_PREVIEW => {
            format!(" (data: {}... ({} bytes))", hex::encode(&raw[..RAW_PREVIEW]), n)
        }
        _ => format!(" (data: {})", hex::encode(raw)),
    }
}

fn packet_id_suffix(packet_id: &Option<u16>) -> String {
    packet_id
        .map(|id| format!(" (packet ID: {})", id))
        .unwrap_or_default()
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {}", r))
        .unwrap_or_default()
}

impl MqttClientError {
    /// The same call may succeed if retried, possibly after reconnecting.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ConnectionLost { .. }
            | Self::OperationTimeout { .. }
            | Self::NotConnected => true,
            Self::Transport { error, .. } => matches!(
                error,
                TransportError::HandshakeTimeout(_)
                    | TransportError::Io(_)
                    | TransportError::StreamNotReady(_)
            ),
            _ => false,
        }
    }

    /// The connection is gone; a fresh one may work.
    pub fn should_reconnect(&self) -> bool {
        match self {
            Self::ConnectionLost { .. } => true,
            Self::Transport { error, .. } => {
                error.is_terminal() && *error != TransportError::ConnectionNotInitialized
            }
            _ => false,
        }
    }

    /// Neither retrying nor reconnecting will change the outcome.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidConfiguration { .. } | Self::ProtocolViolation { .. } => true,
            Self::Transport { error, .. } => matches!(error, TransportError::Configuration(_)),
            _ => false,
        }
    }

    /// Bad credentials or not authorized, in either protocol version.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused {
                reason_code: 0x04 | 0x05 | 0x86 | 0x87 | 0x8C,
                ..
            }
        )
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Like `From<ParseError>`, keeping the head of the input that failed.
    pub fn from_parse_error_with_data(error: ParseError, raw: &[u8]) -> Self {
        match Self::from(error) {
            Self::PacketParsing { parse_error, .. } => Self::PacketParsing {
                parse_error,
                raw_data: raw[..raw.len().min(RAW_DATA_LIMIT)].to_vec(),
            },
            other => other,
        }
    }

    pub(crate) fn timeout(operation: &str, timeout: Duration) -> Self {
        Self::OperationTimeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

impl From<TransportError> for MqttClientError {
    fn from(error: TransportError) -> Self {
        Self::Transport {
            message: error.to_string(),
            error,
        }
    }
}

impl From<ParseError> for MqttClientError {
    fn from(error: ParseError) -> Self {
        match error {
            // encoder rejected caller input
            ParseError::InvalidArgument(message) => Self::InvalidArgument { message },
            other => Self::PacketParsing {
                parse_error: other.to_string(),
                raw_data: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quic::StreamId;

    fn lost() -> MqttClientError {
        MqttClientError::ConnectionLost {
            reason: "stream closed by peer".to_string(),
        }
    }

    #[test]
    fn test_classification() {
        let timeout = MqttClientError::timeout("ping", Duration::from_millis(500));
        assert!(timeout.is_recoverable());
        assert!(!timeout.should_reconnect());
        assert!(!timeout.is_fatal());

        assert!(lost().is_recoverable());
        assert!(lost().should_reconnect());

        let handshake: MqttClientError =
            TransportError::HandshakeTimeout(Duration::from_secs(15)).into();
        assert!(handshake.is_recoverable());
        assert!(handshake.should_reconnect());

        let refused_tls: MqttClientError =
            TransportError::HandshakeFailure("bad certificate".to_string()).into();
        assert!(!refused_tls.is_recoverable());
        assert!(refused_tls.should_reconnect());

        let uninit: MqttClientError = TransportError::ConnectionNotInitialized.into();
        assert!(!uninit.should_reconnect());
    }

    #[test]
    fn test_fatal_errors() {
        let config: MqttClientError =
            TransportError::Configuration("no trust anchors".to_string()).into();
        assert!(config.is_fatal());
        assert!(!config.is_recoverable());
        assert!(MqttClientError::ProtocolViolation {
            message: "broker sent CONNECT".to_string()
        }
        .is_fatal());
        assert!(!MqttClientError::NotConnected.is_fatal());
    }

    #[test]
    fn test_auth_codes() {
        let refused = |code| MqttClientError::ConnectionRefused {
            reason_code: code,
            description: String::new(),
        };
        for code in [0x04, 0x05, 0x86, 0x87, 0x8C] {
            assert!(refused(code).is_auth_error(), "0x{:02X}", code);
        }
        assert!(!refused(0x03).is_auth_error());
        assert!(!refused(0x97).is_auth_error());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            MqttClientError::timeout("connect", Duration::from_secs(5)).to_string(),
            "Operation 'connect' timed out after 5000 ms"
        );
        assert_eq!(
            MqttClientError::PublishFailed {
                packet_id: Some(42),
                reason_code: 0x97,
                reason_string: Some("Quota exceeded".to_string()),
            }
            .to_string(),
            "Publish failed (packet ID: 42) - code: 0x97: Quota exceeded"
        );
        assert_eq!(
            MqttClientError::PublishFailed {
                packet_id: None,
                reason_code: 0x80,
                reason_string: None,
            }
            .to_string(),
            "Publish failed - code: 0x80"
        );
        assert_eq!(
            MqttClientError::SubscribeFailed {
                topics: vec!["a/#".to_string()],
                reason_codes: vec![0x87],
            }
            .to_string(),
            "Subscribe failed for [\"a/#\"] with reason codes [87]"
        );
        assert_eq!(
            MqttClientError::NotConnected.to_string(),
            "Not connected to broker"
        );
    }

    #[test]
    fn test_parse_errors() {
        let err: MqttClientError = ParseError::InvalidArgument("QoS 3".to_string()).into();
        assert!(matches!(err, MqttClientError::InvalidArgument { .. }));

        let err: MqttClientError = ParseError::MalformedPacket("bad".to_string()).into();
        assert_eq!(err.to_string(), "Failed to parse MQTT packet: Malformed packet: bad");

        let err = MqttClientError::from_parse_error_with_data(
            ParseError::MalformedPacket("bad".to_string()),
            &[0xde, 0xad, 0xbe, 0xef],
        );
        assert_eq!(
            err.to_string(),
            "Failed to parse MQTT packet: Malformed packet: bad (data: deadbeef)"
        );

        let long = [0xabu8; 300];
        match MqttClientError::from_parse_error_with_data(
            ParseError::InvalidPacketType(0),
            &long,
        ) {
            MqttClientError::PacketParsing { raw_data, .. } => assert_eq!(raw_data.len(), 100),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_transport_wrapping() {
        let err: MqttClientError = TransportError::UnknownStream(StreamId(8)).into();
        assert_eq!(
            err.transport_error(),
            Some(&TransportError::UnknownStream(StreamId(8)))
        );
        assert_eq!(err.to_string(), "QUIC transport error: Unknown stream 8");
    }

    #[test]
    fn test_serialize_skips_sources() {
        let err: MqttClientError = TransportError::Io("reset".to_string()).into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["Transport"]["message"], "Transport I/O error: reset");
        assert!(json["Transport"].get("error").is_none());
    }
}
