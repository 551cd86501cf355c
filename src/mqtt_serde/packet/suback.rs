// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use super::is_v5;
use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::check_protocol_version;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::properties::{encode_properties, parse_properties, Properties};

/// SUBACK. One return/reason code per requested filter; codes >= 0x80 are failures.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttSubAck {
    pub protocol_version: u8,
    pub packet_id: u16,
    pub reason_codes: Vec<u8>,
    #[serde(default)]
    pub properties: Properties,
}

impl MqttSubAck {
    pub fn new(packet_id: u16, reason_codes: Vec<u8>, protocol_version: u8) -> Self {
        Self {
            protocol_version,
            packet_id,
            reason_codes,
            properties: Vec::new(),
        }
    }

    /// Granted QoS for each filter, `None` where the broker refused it.
    pub fn granted(&self) -> Vec<Option<u8>> {
        self.reason_codes
            .iter()
            .map(|&code| if code < 0x80 { Some(code) } else { None })
            .collect()
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
        let reason_codes = r.take_rest().to_vec();
        if reason_codes.is_empty() {
            return Err(ParseError::malformed("SUBACK without return codes"));
        }
        Ok(MqttSubAck {
            protocol_version,
            packet_id,
            reason_codes,
            properties,
        })
    }
}

impl MqttControlPacket for MqttSubAck {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::SUBACK
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
        Ok(self.reason_codes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_serde::{MQTT_V311, MQTT_V5};

    #[test]
    fn test_suback_v311() {
        let bytes = MqttSubAck::new(1, vec![0x01, 0x80], MQTT_V311).to_bytes().unwrap();
        assert_eq!(bytes, vec![0x90, 0x04, 0x00, 0x01, 0x01, 0x80]);
        let ack = MqttSubAck::decode(&bytes[2..], MQTT_V311).unwrap();
        assert_eq!(ack.granted(), vec![Some(1), None]);
    }

    #[test]
    fn test_suback_v5() {
        let ack = MqttSubAck::decode(&[0x00, 0x05, 0x00, 0x00, 0x02], MQTT_V5).unwrap();
        assert_eq!(ack.packet_id, 5);
        assert_eq!(ack.reason_codes, vec![0x00, 0x02]);
        assert!(matches!(
            MqttSubAck::decode(&[0x00, 0x05, 0x00], MQTT_V5),
            Err(ParseError::MalformedPacket(_))
        ));
    }
}
