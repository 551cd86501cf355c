// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use super::is_v5;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::properties::{encode_properties, parse_properties, Properties};
use crate::mqtt_serde::check_protocol_version;

/// CONNACK. `reason_code` is the 3.1.1 return code or the 5.0 reason code.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttConnAck {
    pub protocol_version: u8,
    pub session_present: bool,
    pub reason_code: u8,
    #[serde(default)]
    pub properties: Properties,
}

impl MqttConnAck {
    pub fn new(session_present: bool, reason_code: u8, protocol_version: u8) -> Self {
        Self {
            protocol_version,
            session_present,
            reason_code,
            properties: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.reason_code == 0
    }

    pub fn reason_description(&self) -> &'static str {
        connack_reason_description(self.protocol_version, self.reason_code)
    }

    pub fn decode(body: &[u8], protocol_version: u8) -> Result<Self, ParseError> {
        let protocol_version = check_protocol_version(protocol_version)?;
        let mut r = BodyReader::new(body);
        let ack_flags = r.u8("acknowledge flags")?;
        if ack_flags & 0xFE != 0 {
            return Err(ParseError::malformed("CONNACK reserved flag bits are not 0"));
        }
        let reason_code = r.u8("connect reason code")?;
        let properties = if is_v5(protocol_version) && !r.is_empty() {
            parse_properties(&mut r)?
        } else {
            Vec::new()
        };
        if !r.is_empty() {
            return Err(ParseError::malformed(format!(
                "{} trailing bytes in CONNACK",
                r.remaining()
            )));
        }
        Ok(MqttConnAck {
            protocol_version,
            session_present: ack_flags & 0x01 != 0,
            reason_code,
            properties,
        })
    }
}

impl MqttControlPacket for MqttConnAck {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::CONNACK
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        let version = check_protocol_version(self.protocol_version)?;
        let mut vh = vec![self.session_present as u8, self.reason_code];
        if is_v5(version) {
            vh.extend(encode_properties(&self.properties)?);
        }
        Ok(vh)
    }
}

/// Human readable text for a CONNACK return/reason code.
pub fn connack_reason_description(protocol_version: u8, code: u8) -> &'static str {
    if is_v5(protocol_version) {
        match code {
            0x00 => "Success",
            0x80 => "Unspecified error",
            0x81 => "Malformed Packet",
            0x82 => "Protocol Error",
            0x83 => "Implementation specific error",
            0x84 => "Unsupported Protocol Version",
            0x85 => "Client Identifier not valid",
            0x86 => "Bad User Name or Password",
            0x87 => "Not authorized",
            0x88 => "Server unavailable",
            0x89 => "Server busy",
            0x8A => "Banned",
            0x8C => "Bad authentication method",
            0x90 => "Topic Name invalid",
            0x95 => "Packet too large",
            0x97 => "Quota exceeded",
            0x99 => "Payload format invalid",
            0x9A => "Retain not supported",
            0x9B => "QoS not supported",
            0x9C => "Use another server",
            0x9D => "Server moved",
            0x9F => "Connection rate exceeded",
            _ => "Unknown reason code",
        }
    } else {
        match code {
            0 => "Connection accepted",
            1 => "Unacceptable protocol version",
            2 => "Identifier rejected",
            3 => "Server unavailable",
            4 => "Bad user name or password",
            5 => "Not authorized",
            _ => "Unknown return code",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_serde::properties::{PropertiesExt, Property};
    use crate::mqtt_serde::{MQTT_V311, MQTT_V5};

    #[test]
    fn test_connack_v311() {
        let bytes = MqttConnAck::new(true, 0, MQTT_V311).to_bytes().unwrap();
        assert_eq!(bytes, vec![0x20, 0x02, 0x01, 0x00]);
        let ack = MqttConnAck::decode(&bytes[2..], MQTT_V311).unwrap();
        assert!(ack.session_present);
        assert!(ack.is_success());
    }

    #[test]
    fn test_connack_v5_properties() {
        let mut ack = MqttConnAck::new(false, 0, MQTT_V5);
        ack.properties = vec![
            Property::AssignedClientIdentifier("auto-7f".to_string()),
            Property::ServerKeepAlive(20),
        ];
        let bytes = ack.to_bytes().unwrap();
        let decoded = MqttConnAck::decode(&bytes[2..], MQTT_V5).unwrap();
        assert_eq!(decoded.properties.assigned_client_identifier(), Some("auto-7f"));
        assert_eq!(decoded, ack);
    }

    #[test]
    fn test_connack_v5_without_property_length() {
        let ack = MqttConnAck::decode(&[0x00, 0x87], MQTT_V5).unwrap();
        assert!(!ack.is_success());
        assert_eq!(ack.reason_description(), "Not authorized");
    }

    #[test]
    fn test_connack_malformed() {
        assert!(matches!(
            MqttConnAck::decode(&[0x02, 0x00], MQTT_V311),
            Err(ParseError::MalformedPacket(_))
        ));
        assert!(matches!(
            MqttConnAck::decode(&[0x00], MQTT_V311),
            Err(ParseError::MalformedPacket(_))
        ));
        assert!(matches!(
            MqttConnAck::decode(&[0x00, 0x00, 0x00], MQTT_V311),
            Err(ParseError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_reason_descriptions() {
        assert_eq!(connack_reason_description(MQTT_V311, 5), "Not authorized");
        assert_eq!(connack_reason_description(MQTT_V5, 0x86), "Bad User Name or Password");
        assert_eq!(connack_reason_description(MQTT_V311, 42), "Unknown return code");
    }
}
