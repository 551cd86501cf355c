// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use super::is_v5;
use crate::mqtt_serde::check_protocol_version;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::properties::{encode_properties, parse_properties, Properties};

/// DISCONNECT. On 5.0 a normal disconnect with no properties is sent as the
/// two byte short form.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttDisconnect {
    pub protocol_version: u8,
    pub reason_code: u8,
    #[serde(default)]
    pub properties: Properties,
}

impl MqttDisconnect {
    pub fn new(protocol_version: u8) -> Self {
        Self {
            protocol_version,
            reason_code: 0,
            properties: Vec::new(),
        }
    }

    pub fn decode(body: &[u8], protocol_version: u8) -> Result<Self, ParseError> {
        let protocol_version = check_protocol_version(protocol_version)?;
        let mut r = BodyReader::new(body);
        let mut reason_code = 0;
        let mut properties = Vec::new();
        if is_v5(protocol_version) {
            if !r.is_empty() {
                reason_code = r.u8("reason code")?;
            }
            if !r.is_empty() {
                properties = parse_properties(&mut r)?;
            }
        }
        if !r.is_empty() {
            return Err(ParseError::malformed(format!(
                "{} trailing bytes in DISCONNECT",
                r.remaining()
            )));
        }
        Ok(MqttDisconnect {
            protocol_version,
            reason_code,
            properties,
        })
    }
}

impl MqttControlPacket for MqttDisconnect {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::DISCONNECT
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        let version = check_protocol_version(self.protocol_version)?;
        let mut vh = Vec::new();
        if is_v5(version) && (self.reason_code != 0 || !self.properties.is_empty()) {
            vh.push(self.reason_code);
            if !self.properties.is_empty() {
                vh.extend(encode_properties(&self.properties)?);
            }
        }
        Ok(vh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_serde::properties::Property;
    use crate::mqtt_serde::{MQTT_V311, MQTT_V5};

    #[test]
    fn test_disconnect_short_form() {
        assert_eq!(MqttDisconnect::new(MQTT_V311).to_bytes().unwrap(), vec![0xe0, 0x00]);
        assert_eq!(MqttDisconnect::new(MQTT_V5).to_bytes().unwrap(), vec![0xe0, 0x00]);
        assert_eq!(
            MqttDisconnect::decode(&[], MQTT_V5).unwrap(),
            MqttDisconnect::new(MQTT_V5)
        );
    }

    #[test]
    fn test_disconnect_v5_server_reason() {
        let mut d = MqttDisconnect::new(MQTT_V5);
        d.reason_code = 0x8E;
        d.properties = vec![Property::ReasonString("session taken over".to_string())];
        let bytes = d.to_bytes().unwrap();
        assert_eq!(MqttDisconnect::decode(&bytes[2..], MQTT_V5).unwrap(), d);
        assert!(MqttDisconnect::decode(&[0x00], MQTT_V311).is_err());
    }
}
