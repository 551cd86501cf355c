// SPDX-License-Identifier: MPL-2.0

//! MQTT session over a single stream: CONNECT/CONNACK, acknowledgement
//! correlation and inbound message queueing.

pub mod client_session;
pub mod session;
pub mod transport;

pub use client_session::{ClientSession, Pending};
pub use session::{MqttSession, QuicMqttSession};
pub use transport::{QuicStream, StreamTransport};
