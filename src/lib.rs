// SPDX-License-Identifier: MPL-2.0

//! MQTT 3.1.1 / 5.0 client core running over a single QUIC bidirectional stream.
//!
//! The crate is layered leaves first:
//!
//! - [`mqtt_serde`]: stateless MQTT wire codec (remaining length, strings, packet
//!   builders and parsers, a stream framer).
//! - [`quic`]: the QUIC transport. A [`quic::QuicConnection`] owns one worker thread
//!   that drives a `quinn-proto` connection over a UDP socket; callers talk to it
//!   through non-blocking stream queues.
//! - [`mqtt_session`]: the thin composition root that performs CONNECT/CONNACK over a
//!   QUIC stream, correlates acknowledgements and queues inbound messages.
//! - [`mqtt_client`]: client options and the session error type.

pub mod mqtt_client;
pub mod mqtt_serde;
pub mod mqtt_session;
pub mod quic;

pub use mqtt_client::{MqttClientError, MqttClientOptions};
pub use mqtt_session::{MqttSession, QuicMqttSession, QuicStream, StreamTransport};
pub use quic::{ConnectionState, QuicConfig, QuicConnection, StreamId, TransportError};
