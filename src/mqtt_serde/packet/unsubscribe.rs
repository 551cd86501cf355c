// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use super::is_v5;
use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::properties::{encode_properties, parse_properties, Properties};
use crate::mqtt_serde::{check_protocol_version, encode_utf8_string};

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttUnsubscribe {
    pub protocol_version: u8,
    pub packet_id: u16,
    pub topic_filters: Vec<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl MqttUnsubscribe {
    pub fn new(packet_id: u16, topic_filters: Vec<String>, protocol_version: u8) -> Self {
        Self {
            protocol_version,
            packet_id,
            topic_filters,
            properties: Vec::new(),
        }
    }

    pub fn decode(body: &[u8], protocol_version: u8) -> Result<Self, ParseError> {
        let protocol_version = check_protocol_version(protocol_version)?;
        let mut r = BodyReader::new(body);
        let packet_id = r.u16("packet identifier")?;
        let properties = if is_v5(protocol_version) {
            parse_properties(&mut r)?
        } else {
            Vec::new()
        };
        let mut topic_filters = Vec::new();
        while !r.is_empty() {
            topic_filters.push(r.utf8("topic filter")?);
        }
        if topic_filters.is_empty() {
            return Err(ParseError::malformed("UNSUBSCRIBE without topic filters"));
        }
        Ok(MqttUnsubscribe {
            protocol_version,
            packet_id,
            topic_filters,
            properties,
        })
    }
}

impl MqttControlPacket for MqttUnsubscribe {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::UNSUBSCRIBE
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        let version = check_protocol_version(self.protocol_version)?;
        if self.packet_id == 0 {
            return Err(ParseError::InvalidArgument(
                "UNSUBSCRIBE needs a non-zero packet identifier".to_string(),
            ));
        }
        let mut vh = TwoByteInteger::encode(self.packet_id).to_vec();
        if is_v5(version) {
            vh.extend(encode_properties(&self.properties)?);
        }
        Ok(vh)
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        if self.topic_filters.is_empty() {
            return Err(ParseError::InvalidArgument(
                "UNSUBSCRIBE needs at least one topic filter".to_string(),
            ));
        }
        let mut payload = Vec::new();
        for filter in &self.topic_filters {
            payload.extend(encode_utf8_string(filter)?);
        }
        Ok(payload)
    }
}
