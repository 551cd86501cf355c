// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use super::{is_v5, validate_qos};
use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::properties::{encode_properties, parse_properties, Properties};
use crate::mqtt_serde::{check_protocol_version, encode_utf8_string};

/// PUBLISH. The packet identifier is present only for QoS 1 and 2.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttPublish {
    pub protocol_version: u8,
    pub dup: bool,
    pub qos: u8,
    pub retain: bool,
    pub topic_name: String,
    pub packet_id: Option<u16>,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub properties: Properties,
}

impl MqttPublish {
    pub fn new(
        topic_name: impl Into<String>,
        qos: u8,
        payload: Vec<u8>,
        packet_id: Option<u16>,
        retain: bool,
        protocol_version: u8,
    ) -> Self {
        Self {
            protocol_version,
            dup: false,
            qos,
            retain,
            topic_name: topic_name.into(),
            packet_id,
            payload,
            properties: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn decode(flags: u8, body: &[u8], protocol_version: u8) -> Result<Self, ParseError> {
        let protocol_version = check_protocol_version(protocol_version)?;
        let dup = flags & 0x08 != 0;
        let qos = (flags & 0x06) >> 1;
        let retain = flags & 0x01 != 0;
        if qos > 2 {
            return Err(ParseError::malformed("invalid QoS level 3"));
        }
        if qos == 0 && dup {
            return Err(ParseError::malformed("DUP flag set on a QoS 0 PUBLISH"));
        }

        let mut r = BodyReader::new(body);
        let topic_name = r.utf8("topic name")?;
        if !is_v5(protocol_version) && topic_name.is_empty() {
            return Err(ParseError::malformed("empty topic name"));
        }
        let packet_id = if qos > 0 {
            let id = r.u16("packet identifier")?;
            if id == 0 {
                return Err(ParseError::malformed("packet identifier 0"));
            }
            Some(id)
        } else {
            None
        };
        let properties = if is_v5(protocol_version) {
            parse_properties(&mut r)?
        } else {
            Vec::new()
        };
        let payload = r.take_rest().to_vec();

        Ok(MqttPublish {
            protocol_version,
            dup,
            qos,
            retain,
            topic_name,
            packet_id,
            payload,
            properties,
        })
    }
}

impl MqttControlPacket for MqttPublish {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::PUBLISH
    }

    fn flags(&self) -> u8 {
        ((self.dup as u8) << 3) | ((self.qos & 0x03) << 1) | (self.retain as u8)
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        let version = check_protocol_version(self.protocol_version)?;
        validate_qos(self.qos)?;
        let mut vh = encode_utf8_string(&self.topic_name)?;
        if self.qos > 0 {
            match self.packet_id {
                Some(id) if id != 0 => vh.extend_from_slice(&TwoByteInteger::encode(id)),
                _ => {
                    return Err(ParseError::InvalidArgument(
                        "QoS > 0 PUBLISH needs a non-zero packet identifier".to_string(),
                    ))
                }
            }
        }
        if is_v5(version) {
            vh.extend(encode_properties(&self.properties)?);
        }
        Ok(vh)
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        Ok(self.payload.clone())
    }
}
