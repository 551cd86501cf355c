// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use super::is_v5;
use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::check_protocol_version;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::properties::{encode_properties, parse_properties, Properties};

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttPubAck {
    pub protocol_version: u8,
    pub packet_id: u16,
    /// Always 0 for 3.1.1.
    pub reason_code: u8,
    #[serde(default)]
    pub properties: Properties,
}

impl MqttPubAck {
    pub fn new(packet_id: u16, protocol_version: u8) -> Self {
        Self {
            protocol_version,
            packet_id,
            reason_code: 0,
            properties: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        // 0x10 = No matching subscribers, still accepted
        self.reason_code < 0x80
    }

    pub fn decode(body: &[u8], protocol_version: u8) -> Result<Self, ParseError> {
        let protocol_version = check_protocol_version(protocol_version)?;
        let mut r = BodyReader::new(body);
        let packet_id = r.u16("packet identifier")?;
        let mut reason_code = 0;
        let mut properties = Vec::new();
        if is_v5(protocol_version) {
            // Reason code and property length are omitted when there is nothing to say
            if !r.is_empty() {
                reason_code = r.u8("reason code")?;
            }
            if !r.is_empty() {
                properties = parse_properties(&mut r)?;
            }
        }
        if !r.is_empty() {
            return Err(ParseError::malformed(format!(
                "{} trailing bytes in PUBACK",
                r.remaining()
            )));
        }
        Ok(MqttPubAck {
            protocol_version,
            packet_id,
            reason_code,
            properties,
        })
    }
}

impl MqttControlPacket for MqttPubAck {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::PUBACK
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        let version = check_protocol_version(self.protocol_version)?;
        let mut vh = TwoByteInteger::encode(self.packet_id).to_vec();
        if is_v5(version) && (self.reason_code != 0 || !self.properties.is_empty()) {
            vh.push(self.reason_code);
            if !self.properties.is_empty() {
                vh.extend(encode_properties(&self.properties)?);
            }
        }
        Ok(vh)
    }
}
