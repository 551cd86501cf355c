// SPDX-License-Identifier: MPL-2.0

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::client_session::{ClientSession, Pending};
use super::transport::{QuicStream, StreamTransport};
use crate::mqtt_client::error::{MqttClientError, MqttClientResult};
use crate::mqtt_client::opts::MqttClientOptions;
use crate::mqtt_serde::control_packet::MqttPacket;
use crate::mqtt_serde::packet::connack::{connack_reason_description, MqttConnAck};
use crate::mqtt_serde::packet::disconnect::MqttDisconnect;
use crate::mqtt_serde::packet::ping::MqttPingReq;
use crate::mqtt_serde::packet::puback::MqttPubAck;
use crate::mqtt_serde::packet::publish::MqttPublish;
use crate::mqtt_serde::packet::subscribe::{MqttSubscribe, TopicSubscription};
use crate::mqtt_serde::packet::unsubscribe::MqttUnsubscribe;
use crate::mqtt_serde::parser::stream::MqttParser;
use crate::mqtt_serde::properties::PropertiesExt;
use crate::quic::{QuicConfig, QuicConnection, TransportError};

const READ_CHUNK: usize = 16 * 1024;
/// Longest single wait on the transport before re-checking the deadline.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// A synchronous MQTT client session over one [`StreamTransport`].
///
/// Every request blocks until its acknowledgement arrives or the configured
/// operation timeout passes. PUBLISH packets that arrive meanwhile are queued
/// and handed out by [`next_message`](Self::next_message).
pub struct MqttSession<T: StreamTransport> {
    transport: T,
    options: MqttClientOptions,
    parser: MqttParser,
    session: ClientSession,
    inbound: VecDeque<MqttPublish>,
    connected: bool,
    session_present: bool,
    assigned_client_id: Option<String>,
    server_keep_alive: Option<u16>,
}

/// The session as used in production: MQTT over a QUIC stream.
pub type QuicMqttSession = MqttSession<QuicStream>;

impl QuicMqttSession {
    /// Connects QUIC to `host:port`, opens one bidirectional stream and runs
    /// the CONNECT/CONNACK exchange on it.
    pub fn connect_to(
        host: &str,
        port: u16,
        quic_config: QuicConfig,
        options: MqttClientOptions,
    ) -> MqttClientResult<Self> {
        let conn = Arc::new(QuicConnection::new(quic_config));
        conn.connect(host, port)?;
        let stream = match QuicStream::open(conn.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                conn.close();
                return Err(e.into());
            }
        };
        debug!(stream = %stream.id(), "MQTT stream opened");

        let mut session = MqttSession::new(stream, options);
        if let Err(e) = session.connect() {
            conn.close();
            return Err(e);
        }
        Ok(session)
    }
}

impl<T: StreamTransport> MqttSession<T> {
    pub fn new(transport: T, options: MqttClientOptions) -> Self {
        let parser = MqttParser::new(READ_CHUNK, options.protocol_version);
        MqttSession {
            transport,
            options,
            parser,
            session: ClientSession::new(),
            inbound: VecDeque::new(),
            connected: false,
            session_present: false,
            assigned_client_id: None,
            server_keep_alive: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn options(&self) -> &MqttClientOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn session_present(&self) -> bool {
        self.session_present
    }

    /// Client identifier assigned by a v5 broker when ours was empty.
    pub fn assigned_client_id(&self) -> Option<&str> {
        self.assigned_client_id.as_deref()
    }

    /// Keep-alive in effect: the broker's override (v5) or our own.
    pub fn keep_alive(&self) -> u16 {
        self.server_keep_alive.unwrap_or(self.options.keep_alive)
    }

    pub fn pending_messages(&self) -> usize {
        self.inbound.len()
    }

    /// Sends CONNECT and waits for CONNACK, which must be the first packet back.
    pub fn connect(&mut self) -> MqttClientResult<MqttConnAck> {
        if self.connected {
            return Err(MqttClientError::AlreadyConnected);
        }
        let connect = self.options.to_connect();
        info!(
            client_id = %connect.client_id,
            version = connect.protocol_version,
            keep_alive = connect.keep_alive,
            "sending CONNECT"
        );
        self.send_packet(&MqttPacket::Connect(connect))?;

        let timeout = self.options.operation_timeout;
        let deadline = Instant::now() + timeout;
        let connack = loop {
            match self.poll_packet()? {
                Some(MqttPacket::ConnAck(connack)) => break connack,
                Some(other) => {
                    return Err(MqttClientError::UnexpectedPacket {
                        expected: "CONNACK".to_string(),
                        received: other.name().to_string(),
                    })
                }
                None => self.read_more("connect", deadline, timeout)?,
            }
        };

        if !connack.is_success() {
            let description = match connack.properties.reason_string() {
                Some(reason) => format!(
                    "{} ({})",
                    connack_reason_description(connack.protocol_version, connack.reason_code),
                    reason
                ),
                None => connack_reason_description(connack.protocol_version, connack.reason_code)
                    .to_string(),
            };
            warn!(code = connack.reason_code, %description, "broker refused connection");
            return Err(MqttClientError::ConnectionRefused {
                reason_code: connack.reason_code,
                description,
            });
        }

        self.connected = true;
        self.session_present = connack.session_present;
        if !connack.session_present {
            self.session.clear();
        }
        self.assigned_client_id = connack
            .properties
            .assigned_client_identifier()
            .map(str::to_string);
        self.server_keep_alive = connack.properties.server_keep_alive();
        info!(session_present = connack.session_present, "MQTT session established");
        Ok(connack)
    }

    /// Publishes at QoS 0 or 1. QoS 1 waits for the matching PUBACK and
    /// returns its packet identifier.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> MqttClientResult<Option<u16>> {
        self.ensure_connected()?;
        if qos > 1 {
            return Err(MqttClientError::InvalidArgument {
                message: format!("QoS {} publish is not supported", qos),
            });
        }
        if qos == 0 {
            let publish =
                MqttPublish::new(topic, 0, payload.to_vec(), None, retain, self.version());
            self.send_packet(&MqttPacket::Publish(publish))?;
            return Ok(None);
        }

        let packet_id = self.session.next_packet_id()?;
        let publish = MqttPublish::new(
            topic,
            1,
            payload.to_vec(),
            Some(packet_id),
            retain,
            self.version(),
        );
        self.send_packet(&MqttPacket::Publish(publish))?;
        self.session.track(
            packet_id,
            Pending::Publish {
                topic: topic.to_string(),
            },
        );

        let result = self.recv_for_packet(
            "publish",
            |p| matches!(p, MqttPacket::PubAck(ack) if ack.packet_id == packet_id),
        );
        self.session.complete(packet_id);
        match result? {
            MqttPacket::PubAck(puback) if !puback.is_success() => {
                Err(MqttClientError::PublishFailed {
                    packet_id: Some(packet_id),
                    reason_code: puback.reason_code,
                    reason_string: puback.properties.reason_string().map(str::to_string),
                })
            }
            _ => Ok(Some(packet_id)),
        }
    }

    /// Subscribes to one filter and returns the granted QoS.
    pub fn subscribe(&mut self, topic_filter: &str, qos: u8) -> MqttClientResult<u8> {
        self.ensure_connected()?;
        if qos > 1 {
            return Err(MqttClientError::InvalidArgument {
                message: format!("QoS {} subscription is not supported", qos),
            });
        }
        let packet_id = self.session.next_packet_id()?;
        let subscribe = MqttSubscribe::new(
            packet_id,
            vec![TopicSubscription::new(topic_filter, qos)],
            self.version(),
        );
        self.send_packet(&MqttPacket::Subscribe(subscribe))?;
        self.session.track(
            packet_id,
            Pending::Subscribe {
                topics: vec![topic_filter.to_string()],
            },
        );

        let result = self.recv_for_packet(
            "subscribe",
            |p| matches!(p, MqttPacket::SubAck(ack) if ack.packet_id == packet_id),
        );
        self.session.complete(packet_id);
        let suback = match result? {
            MqttPacket::SubAck(suback) => suback,
            other => {
                return Err(MqttClientError::UnexpectedPacket {
                    expected: "SUBACK".to_string(),
                    received: other.name().to_string(),
                })
            }
        };
        match suback.granted().first().copied().flatten() {
            Some(granted) => {
                debug!(topic = topic_filter, granted, "subscribed");
                Ok(granted)
            }
            None => Err(MqttClientError::SubscribeFailed {
                topics: vec![topic_filter.to_string()],
                reason_codes: suback.reason_codes,
            }),
        }
    }

    pub fn unsubscribe(&mut self, topic_filter: &str) -> MqttClientResult<()> {
        self.ensure_connected()?;
        let packet_id = self.session.next_packet_id()?;
        let unsubscribe =
            MqttUnsubscribe::new(packet_id, vec![topic_filter.to_string()], self.version());
        self.send_packet(&MqttPacket::Unsubscribe(unsubscribe))?;
        self.session.track(
            packet_id,
            Pending::Unsubscribe {
                topics: vec![topic_filter.to_string()],
            },
        );

        let result = self.recv_for_packet(
            "unsubscribe",
            |p| matches!(p, MqttPacket::UnsubAck(ack) if ack.packet_id == packet_id),
        );
        self.session.complete(packet_id);
        match result? {
            // v5 carries a reason code per filter
            MqttPacket::UnsubAck(unsuback) if unsuback.reason_codes.iter().any(|c| *c >= 0x80) => {
                Err(MqttClientError::UnsubscribeFailed {
                    topics: vec![topic_filter.to_string()],
                    reason_codes: unsuback.reason_codes,
                })
            }
            _ => Ok(()),
        }
    }

    /// PINGREQ/PINGRESP round trip; returns the elapsed time.
    pub fn ping(&mut self) -> MqttClientResult<Duration> {
        self.ensure_connected()?;
        let started = Instant::now();
        self.send_packet(&MqttPacket::PingReq(MqttPingReq::new()))?;
        self.recv_for_packet("ping", |p| matches!(p, MqttPacket::PingResp(_)))?;
        Ok(started.elapsed())
    }

    /// Next queued or newly arrived application message. `Ok(None)` when
    /// nothing arrives within `timeout`.
    pub fn next_message(&mut self, timeout: Duration) -> MqttClientResult<Option<MqttPublish>> {
        self.ensure_connected()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.inbound.pop_front() {
                return Ok(Some(message));
            }
            match self.poll_packet()? {
                Some(packet) => self.handle_unsolicited(packet)?,
                None => match self.read_more("next_message", deadline, timeout) {
                    Ok(()) => {}
                    Err(MqttClientError::OperationTimeout { .. }) => return Ok(None),
                    Err(e) => return Err(e),
                },
            }
        }
    }

    /// Acknowledges a QoS 1 delivery when `auto_ack` is off.
    pub fn ack(&mut self, message: &MqttPublish) -> MqttClientResult<()> {
        match (message.qos, message.packet_id) {
            (1, Some(packet_id)) => {
                let puback = MqttPubAck::new(packet_id, self.version());
                self.send_packet(&MqttPacket::PubAck(puback))
            }
            _ => Ok(()),
        }
    }

    /// Sends DISCONNECT, half-closes the stream and closes the transport.
    pub fn disconnect(&mut self) -> MqttClientResult<()> {
        if !self.connected {
            self.transport.close();
            return Ok(());
        }
        self.connected = false;
        let sent = self.send_packet(&MqttPacket::Disconnect(MqttDisconnect::new(self.version())));
        let finished = self.transport.finish().map_err(MqttClientError::from);
        // queued stream data is flushed ahead of the connection close
        self.transport.close();
        info!("MQTT session disconnected");
        sent.and(finished)
    }

    fn version(&self) -> u8 {
        self.options.protocol_version
    }

    fn ensure_connected(&self) -> MqttClientResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(MqttClientError::NotConnected)
        }
    }

    fn send_packet(&mut self, packet: &MqttPacket) -> MqttClientResult<()> {
        let bytes = packet.to_bytes()?;
        trace!(packet = packet.name(), len = bytes.len(), "sending packet");
        self.transport.send(&bytes)?;
        Ok(())
    }

    /// Next complete packet already buffered, without touching the transport.
    fn poll_packet(&mut self) -> MqttClientResult<Option<MqttPacket>> {
        let packet = self
            .parser
            .next_packet_with_frame()
            .map_err(|(e, frame)| {
                warn!(error = %e, frame = %hex::encode(&frame), "dropping undecodable packet");
                MqttClientError::from_parse_error_with_data(e, &frame)
            })?;
        if let Some(p) = &packet {
            trace!(packet = p.name(), "received packet");
        }
        Ok(packet)
    }

    /// Waits for the first packet matching `f`, handling everything else on
    /// the way.
    fn recv_for_packet<F>(&mut self, operation: &str, mut f: F) -> MqttClientResult<MqttPacket>
    where
        F: FnMut(&MqttPacket) -> bool,
    {
        let timeout = self.options.operation_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            match self.poll_packet()? {
                Some(packet) if f(&packet) => return Ok(packet),
                Some(packet) => self.handle_unsolicited(packet)?,
                None => self.read_more(operation, deadline, timeout)?,
            }
        }
    }

    /// Moves at least one chunk from the transport into the parser.
    fn read_more(
        &mut self,
        operation: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> MqttClientResult<()> {
        loop {
            let data = self
                .transport
                .recv(READ_CHUNK)
                .map_err(|e| self.transport_failed(e))?;
            if !data.is_empty() {
                self.parser.feed(&data);
                return Ok(());
            }
            if self.transport.is_finished() {
                self.connected = false;
                return Err(MqttClientError::ConnectionLost {
                    reason: "stream closed by peer".to_string(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MqttClientError::timeout(operation, timeout));
            }
            self.transport
                .wait_readable((deadline - now).min(POLL_SLICE))
                .map_err(|e| self.transport_failed(e))?;
        }
    }

    /// A transport without a live connection means the session is over.
    fn transport_failed(&mut self, error: TransportError) -> MqttClientError {
        if error == TransportError::ConnectionNotInitialized {
            self.connected = false;
            return MqttClientError::ConnectionLost {
                reason: "QUIC connection is gone".to_string(),
            };
        }
        error.into()
    }

    fn handle_unsolicited(&mut self, packet: MqttPacket) -> MqttClientResult<()> {
        match packet {
            MqttPacket::Publish(publish) => {
                if publish.qos == 1 && self.options.auto_ack {
                    self.ack(&publish)?;
                }
                if publish.qos == 2 {
                    warn!(topic = %publish.topic_name, "QoS 2 delivery queued without PUBREC");
                }
                self.inbound.push_back(publish);
                Ok(())
            }
            MqttPacket::Disconnect(disconnect) => {
                self.connected = false;
                Err(MqttClientError::ConnectionLost {
                    reason: format!(
                        "broker sent DISCONNECT (code 0x{:02X})",
                        disconnect.reason_code
                    ),
                })
            }
            MqttPacket::PubAck(_)
            | MqttPacket::SubAck(_)
            | MqttPacket::UnsubAck(_)
            | MqttPacket::PingResp(_) => {
                debug!(packet = packet.name(), "dropping stale acknowledgement");
                Ok(())
            }
            other => Err(MqttClientError::ProtocolViolation {
                message: format!("broker sent {}", other.name()),
            }),
        }
    }
}
