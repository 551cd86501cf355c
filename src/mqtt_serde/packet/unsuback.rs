// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use super::is_v5;
use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::check_protocol_version;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::properties::{encode_properties, parse_properties, Properties};

/// UNSUBACK. 3.1.1 carries only the packet id; 5.0 adds one reason code per filter.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttUnsubAck {
    pub protocol_version: u8,
    pub packet_id: u16,
    #[serde(default)]
    pub reason_codes: Vec<u8>,
    #[serde(default)]
    pub properties: Properties,
}

impl MqttUnsubAck {
    pub fn new(packet_id: u16, reason_codes: Vec<u8>, protocol_version: u8) -> Self {
        Self {
            protocol_version,
            packet_id,
            reason_codes,
            properties: Vec::new(),
        }
    }

    pub fn decode(body: &[u8], protocol_version: u8) -> Result<Self, ParseError> {
        let protocol_version = check_protocol_version(protocol_version)?;
        let mut r = BodyReader::new(body);
        let packet_id = r.u16("packet identifier")?;
        let (properties, reason_codes) = if is_v5(protocol_version) {
            let properties = parse_properties(&mut r)?;
            (properties, r.take_rest().to_vec())
        } else {
            (Vec::new(), Vec::new())
        };
        if !r.is_empty() {
            return Err(ParseError::malformed(format!(
                "{} trailing bytes in UNSUBACK",
                r.remaining()
            )));
        }
        Ok(MqttUnsubAck {
            protocol_version,
            packet_id,
            reason_codes,
            properties,
        })
    }
}

impl MqttControlPacket for MqttUnsubAck {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::UNSUBACK
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        let version = check_protocol_version(self.protocol_version)?;
        let mut vh = TwoByteInteger::encode(self.packet_id).to_vec();
        if is_v5(version) {
            vh.extend(encode_properties(&self.properties)?);
        }
        Ok(vh)
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        if is_v5(self.protocol_version) {
            Ok(self.reason_codes.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_serde::{MQTT_V311, MQTT_V5};

    #[test]
    fn test_unsuback_v311() {
        let bytes = MqttUnsubAck::new(4, vec![], MQTT_V311).to_bytes().unwrap();
        assert_eq!(bytes, vec![0xb0, 0x02, 0x00, 0x04]);
        assert_eq!(MqttUnsubAck::decode(&bytes[2..], MQTT_V311).unwrap().packet_id, 4);
    }

    #[test]
    fn test_unsuback_v5_reason_codes() {
        let ack = MqttUnsubAck::new(4, vec![0x00, 0x11], MQTT_V5);
        let bytes = ack.to_bytes().unwrap();
        assert_eq!(bytes, vec![0xb0, 0x05, 0x00, 0x04, 0x00, 0x00, 0x11]);
        assert_eq!(MqttUnsubAck::decode(&bytes[2..], MQTT_V5).unwrap(), ack);
    }
}
