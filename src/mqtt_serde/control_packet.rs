// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use super::encode_variable_length;
use super::packet::connack::MqttConnAck;
use super::packet::connect::MqttConnect;
use super::packet::disconnect::MqttDisconnect;
use super::packet::ping::{MqttPingReq, MqttPingResp};
use super::packet::puback::MqttPubAck;
use super::packet::publish::MqttPublish;
use super::packet::suback::MqttSubAck;
use super::packet::subscribe::MqttSubscribe;
use super::packet::unsuback::MqttUnsubAck;
use super::packet::unsubscribe::MqttUnsubscribe;
use super::parser::{parse_fixed_header, FixedHeader, ParseError};

/// Every packet the client core encodes or decodes. Packets whose wire layout
/// differs between 3.1.1 and 5.0 carry their protocol level.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum MqttPacket {
    Connect(MqttConnect),
    ConnAck(MqttConnAck),
    Publish(MqttPublish),
    PubAck(MqttPubAck),
    Subscribe(MqttSubscribe),
    SubAck(MqttSubAck),
    Unsubscribe(MqttUnsubscribe),
    UnsubAck(MqttUnsubAck),
    PingReq(MqttPingReq),
    PingResp(MqttPingResp),
    Disconnect(MqttDisconnect),
}

impl MqttPacket {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        match self {
            MqttPacket::Connect(p) => p.to_bytes(),
            MqttPacket::ConnAck(p) => p.to_bytes(),
            MqttPacket::Publish(p) => p.to_bytes(),
            MqttPacket::PubAck(p) => p.to_bytes(),
            MqttPacket::Subscribe(p) => p.to_bytes(),
            MqttPacket::SubAck(p) => p.to_bytes(),
            MqttPacket::Unsubscribe(p) => p.to_bytes(),
            MqttPacket::UnsubAck(p) => p.to_bytes(),
            MqttPacket::PingReq(p) => p.to_bytes(),
            MqttPacket::PingResp(p) => p.to_bytes(),
            MqttPacket::Disconnect(p) => p.to_bytes(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MqttPacket::Connect(_) => "CONNECT",
            MqttPacket::ConnAck(_) => "CONNACK",
            MqttPacket::Publish(_) => "PUBLISH",
            MqttPacket::PubAck(_) => "PUBACK",
            MqttPacket::Subscribe(_) => "SUBSCRIBE",
            MqttPacket::SubAck(_) => "SUBACK",
            MqttPacket::Unsubscribe(_) => "UNSUBSCRIBE",
            MqttPacket::UnsubAck(_) => "UNSUBACK",
            MqttPacket::PingReq(_) => "PINGREQ",
            MqttPacket::PingResp(_) => "PINGRESP",
            MqttPacket::Disconnect(_) => "DISCONNECT",
        }
    }

    /// Decodes the packet at the head of `buffer`, returning it with the number
    /// of bytes it occupied. A buffer shorter than the framed length fails with
    /// `InsufficientData`; nothing past the frame is read.
    pub fn from_bytes_with_version(
        buffer: &[u8],
        mqtt_version: u8,
    ) -> Result<(MqttPacket, usize), ParseError> {
        let header = parse_fixed_header(buffer)?;
        let total_len = header.total_len();
        if buffer.len() < total_len {
            return Err(ParseError::InsufficientData(
                total_len - buffer.len(),
                "packet body".to_string(),
            ));
        }
        let body = &buffer[header.header_len..total_len];
        let packet = Self::decode(&header, body, mqtt_version)?;
        Ok((packet, total_len))
    }

    fn decode(header: &FixedHeader, body: &[u8], version: u8) -> Result<MqttPacket, ParseError> {
        let packet_type = ControlPacketType::try_from(header.packet_type())?;
        let expected_flags = match packet_type {
            ControlPacketType::PUBLISH => None,
            ControlPacketType::SUBSCRIBE | ControlPacketType::UNSUBSCRIBE => Some(0x02),
            _ => Some(0x00),
        };
        if let Some(flags) = expected_flags {
            if header.flags() != flags {
                return Err(ParseError::malformed(format!(
                    "invalid fixed header flags 0x{:x} for packet type {}",
                    header.flags(),
                    header.packet_type()
                )));
            }
        }

        let packet = match packet_type {
            ControlPacketType::CONNECT => MqttPacket::Connect(MqttConnect::decode(body)?),
            ControlPacketType::CONNACK => MqttPacket::ConnAck(MqttConnAck::decode(body, version)?),
            ControlPacketType::PUBLISH => {
                MqttPacket::Publish(MqttPublish::decode(header.flags(), body, version)?)
            }
            ControlPacketType::PUBACK => MqttPacket::PubAck(MqttPubAck::decode(body, version)?),
            ControlPacketType::SUBSCRIBE => {
                MqttPacket::Subscribe(MqttSubscribe::decode(body, version)?)
            }
            ControlPacketType::SUBACK => MqttPacket::SubAck(MqttSubAck::decode(body, version)?),
            ControlPacketType::UNSUBSCRIBE => {
                MqttPacket::Unsubscribe(MqttUnsubscribe::decode(body, version)?)
            }
            ControlPacketType::UNSUBACK => {
                MqttPacket::UnsubAck(MqttUnsubAck::decode(body, version)?)
            }
            ControlPacketType::PINGREQ => MqttPacket::PingReq(MqttPingReq::decode(body)?),
            ControlPacketType::PINGRESP => MqttPacket::PingResp(MqttPingResp::decode(body)?),
            ControlPacketType::DISCONNECT => {
                MqttPacket::Disconnect(MqttDisconnect::decode(body, version)?)
            }
            // PUBREC/PUBREL/PUBCOMP/AUTH are outside the client core
            _ => return Err(ParseError::InvalidPacketType(header.packet_type())),
        };
        Ok(packet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPacketType {
    CONNECT = 1,
    CONNACK = 2,
    PUBLISH = 3,
    PUBACK = 4,
    PUBREC = 5,
    PUBREL = 6,
    PUBCOMP = 7,
    SUBSCRIBE = 8,
    SUBACK = 9,
    UNSUBSCRIBE = 10,
    UNSUBACK = 11,
    PINGREQ = 12,
    PINGRESP = 13,
    DISCONNECT = 14,
    AUTH = 15,
}

impl TryFrom<u8> for ControlPacketType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ControlPacketType::CONNECT),
            2 => Ok(ControlPacketType::CONNACK),
            3 => Ok(ControlPacketType::PUBLISH),
            4 => Ok(ControlPacketType::PUBACK),
            5 => Ok(ControlPacketType::PUBREC),
            6 => Ok(ControlPacketType::PUBREL),
            7 => Ok(ControlPacketType::PUBCOMP),
            8 => Ok(ControlPacketType::SUBSCRIBE),
            9 => Ok(ControlPacketType::SUBACK),
            10 => Ok(ControlPacketType::UNSUBSCRIBE),
            11 => Ok(ControlPacketType::UNSUBACK),
            12 => Ok(ControlPacketType::PINGREQ),
            13 => Ok(ControlPacketType::PINGRESP),
            14 => Ok(ControlPacketType::DISCONNECT),
            15 => Ok(ControlPacketType::AUTH),
            other => Err(ParseError::InvalidPacketType(other)),
        }
    }
}

pub trait MqttControlPacket {
    // MQTT 5.0: 2.1.2, MQTT control packet type
    fn control_packet_type(&self) -> ControlPacketType;

    // MQTT 5.0: 2.1.3, Flags in the fixed header
    fn flags(&self) -> u8 {
        0u8
    }

    fn fixed_header(&self, remaining_length: usize) -> Result<Vec<u8>, ParseError> {
        let byte1: u8 = (self.control_packet_type() as u8) << 4 | self.flags();
        let mut hdr = vec![byte1];
        hdr.extend(encode_variable_length(remaining_length)?);
        Ok(hdr)
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError>;

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        Ok(Vec::new())
    }

    fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        let vhdr = self.variable_header()?;
        let payload = self.payload()?;
        let remaining_length = vhdr.len() + payload.len();
        let mut bytes = self.fixed_header(remaining_length)?;
        bytes.reserve(remaining_length);
        bytes.extend(vhdr);
        bytes.extend(payload);
        Ok(bytes)
    }
}
