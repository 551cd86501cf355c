// SPDX-License-Identifier: MPL-2.0

//! One-call packet builders returning wire bytes.
//!
//! Empty `username`/`password` strings mean "not present", matching how the
//! connection options treat unset credentials.

use crate::mqtt_serde::control_packet::MqttControlPacket;
use crate::mqtt_serde::packet::connect::MqttConnect;
use crate::mqtt_serde::packet::disconnect::MqttDisconnect;
use crate::mqtt_serde::packet::ping::MqttPingReq;
use crate::mqtt_serde::packet::puback::MqttPubAck;
use crate::mqtt_serde::packet::publish::MqttPublish;
use crate::mqtt_serde::packet::subscribe::{MqttSubscribe, TopicSubscription};
use crate::mqtt_serde::packet::unsubscribe::MqttUnsubscribe;
use crate::mqtt_serde::parser::ParseError;
use crate::mqtt_serde::properties::Properties;
use crate::mqtt_serde::{MQTT_V311, MQTT_V5};

fn credentials(username: &str, password: &str) -> (Option<String>, Option<Vec<u8>>) {
    let username = (!username.is_empty()).then(|| username.to_string());
    let password = (!password.is_empty()).then(|| password.as_bytes().to_vec());
    (username, password)
}

/// MQTT 3.1.1 CONNECT.
pub fn build_connect(
    client_id: &str,
    username: &str,
    password: &str,
    keep_alive: u16,
    clean_session: bool,
) -> Result<Vec<u8>, ParseError> {
    let (username, password) = credentials(username, password);
    MqttConnect::new(client_id, keep_alive, clean_session, MQTT_V311)
        .with_credentials(username, password)
        .to_bytes()
}

/// MQTT 5.0 CONNECT with CONNECT properties.
pub fn build_connect_v5(
    client_id: &str,
    username: &str,
    password: &str,
    keep_alive: u16,
    clean_start: bool,
    properties: Properties,
) -> Result<Vec<u8>, ParseError> {
    let (username, password) = credentials(username, password);
    MqttConnect::new(client_id, keep_alive, clean_start, MQTT_V5)
        .with_credentials(username, password)
        .with_properties(properties)
        .to_bytes()
}

/// PUBLISH; `packet_id` is ignored for QoS 0.
pub fn build_publish(
    topic: &str,
    payload: &[u8],
    qos: u8,
    retain: bool,
    packet_id: u16,
    protocol_version: u8,
) -> Result<Vec<u8>, ParseError> {
    let packet_id = (qos > 0).then_some(packet_id);
    MqttPublish::new(topic, qos, payload.to_vec(), packet_id, retain, protocol_version).to_bytes()
}

pub fn build_subscribe(
    packet_id: u16,
    topic_filter: &str,
    qos: u8,
    protocol_version: u8,
) -> Result<Vec<u8>, ParseError> {
    MqttSubscribe::new(
        packet_id,
        vec![TopicSubscription::new(topic_filter, qos)],
        protocol_version,
    )
    .to_bytes()
}

pub fn build_unsubscribe(
    packet_id: u16,
    topic_filter: &str,
    protocol_version: u8,
) -> Result<Vec<u8>, ParseError> {
    MqttUnsubscribe::new(packet_id, vec![topic_filter.to_string()], protocol_version).to_bytes()
}

pub fn build_puback(packet_id: u16, protocol_version: u8) -> Result<Vec<u8>, ParseError> {
    MqttPubAck::new(packet_id, protocol_version).to_bytes()
}

pub fn build_pingreq() -> Result<Vec<u8>, ParseError> {
    MqttPingReq::new().to_bytes()
}

pub fn build_disconnect(protocol_version: u8) -> Result<Vec<u8>, ParseError> {
    MqttDisconnect::new(protocol_version).to_bytes()
}
