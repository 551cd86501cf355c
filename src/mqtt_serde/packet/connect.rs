// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use super::is_v5;
use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::properties::{encode_properties, parse_properties, Properties};
use crate::mqtt_serde::{check_protocol_version, encode_binary_data, encode_utf8_string};

const PROTOCOL_NAME: &str = "MQTT";

const FLAG_CLEAN_START: u8 = 0x02;
const FLAG_WILL: u8 = 0x04;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// Will message published by the broker if the connection drops without DISCONNECT.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Will {
    pub retain: bool,
    pub qos: u8,
    pub topic: String,
    pub message: Vec<u8>,
    /// Will properties, MQTT 5.0 only.
    #[serde(default)]
    pub properties: Properties,
}

impl Will {
    pub fn new(topic: impl Into<String>, message: Vec<u8>, qos: u8, retain: bool) -> Self {
        Self {
            retain,
            qos,
            topic: topic.into(),
            message,
            properties: Vec::new(),
        }
    }
}

/// CONNECT packet for protocol level 4 or 5.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttConnect {
    pub protocol_version: u8,
    /// "Clean Session" in 3.1.1, "Clean Start" in 5.0.
    pub clean_start: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    #[serde(default)]
    pub properties: Properties,
}

impl MqttConnect {
    pub fn new(
        client_id: impl Into<String>,
        keep_alive: u16,
        clean_start: bool,
        protocol_version: u8,
    ) -> Self {
        Self {
            protocol_version,
            clean_start,
            keep_alive,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
            properties: Vec::new(),
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<Vec<u8>>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_will(mut self, will: Will) -> Self {
        self.will = Some(will);
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_start {
            flags |= FLAG_CLEAN_START;
        }
        if let Some(will) = &self.will {
            flags |= FLAG_WILL;
            flags |= will.qos << 3;
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
        }
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
        }
        if self.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
        flags
    }

    pub fn decode(body: &[u8]) -> Result<Self, ParseError> {
        let mut r = BodyReader::new(body);

        let name = r.utf8("protocol name")?;
        if name != PROTOCOL_NAME {
            return Err(ParseError::malformed(format!(
                "invalid protocol name {:?}",
                name
            )));
        }
        let protocol_version = check_protocol_version(r.u8("protocol level")?)?;
        let v5 = is_v5(protocol_version);

        let flags = r.u8("connect flags")?;
        if flags & 0x01 != 0 {
            return Err(ParseError::malformed("CONNECT reserved flag bit is not 0"));
        }
        let will_flag = flags & FLAG_WILL != 0;
        let will_qos = (flags >> 3) & 0x03;
        let will_retain = flags & FLAG_WILL_RETAIN != 0;
        if will_qos > 2 {
            return Err(ParseError::malformed("invalid will QoS 3"));
        }
        if !will_flag && (will_qos != 0 || will_retain) {
            return Err(ParseError::malformed(
                "will QoS/retain set without the will flag",
            ));
        }
        let username_flag = flags & FLAG_USERNAME != 0;
        let password_flag = flags & FLAG_PASSWORD != 0;
        if !v5 && password_flag && !username_flag {
            return Err(ParseError::malformed("password flag requires username flag"));
        }

        let keep_alive = r.u16("keep alive")?;
        let properties = if v5 { parse_properties(&mut r)? } else { Vec::new() };

        let client_id = r.utf8("client identifier")?;
        let will = if will_flag {
            let properties = if v5 { parse_properties(&mut r)? } else { Vec::new() };
            let topic = r.utf8("will topic")?;
            let message = r.binary("will payload")?;
            Some(Will {
                retain: will_retain,
                qos: will_qos,
                topic,
                message,
                properties,
            })
        } else {
            None
        };
        let username = if username_flag {
            Some(r.utf8("user name")?)
        } else {
            None
        };
        let password = if password_flag {
            Some(r.binary("password")?)
        } else {
            None
        };

        if !r.is_empty() {
            return Err(ParseError::malformed(format!(
                "{} trailing bytes in CONNECT",
                r.remaining()
            )));
        }

        Ok(MqttConnect {
            protocol_version,
            clean_start: flags & FLAG_CLEAN_START != 0,
            keep_alive,
            client_id,
            will,
            username,
            password,
            properties,
        })
    }
}

impl MqttControlPacket for MqttConnect {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::CONNECT
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        let version = check_protocol_version(self.protocol_version)?;
        if let Some(will) = &self.will {
            super::validate_qos(will.qos)?;
        }
        if !is_v5(version) && self.password.is_some() && self.username.is_none() {
            return Err(ParseError::InvalidArgument(
                "MQTT 3.1.1 requires a user name when a password is set".to_string(),
            ));
        }

        let mut vh = encode_utf8_string(PROTOCOL_NAME)?;
        vh.push(version);
        vh.push(self.connect_flags());
        vh.extend_from_slice(&TwoByteInteger::encode(self.keep_alive));
        if is_v5(version) {
            vh.extend(encode_properties(&self.properties)?);
        }
        Ok(vh)
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        let mut payload = encode_utf8_string(&self.client_id)?;

        if let Some(will) = &self.will {
            if is_v5(self.protocol_version) {
                payload.extend(encode_properties(&will.properties)?);
            }
            payload.extend(encode_utf8_string(&will.topic)?);
            payload.extend(encode_binary_data(&will.message)?);
        }
        if let Some(username) = &self.username {
            payload.extend(encode_utf8_string(username)?);
        }
        if let Some(password) = &self.password {
            payload.extend(encode_binary_data(password)?);
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_serde::properties::Property;
    use crate::mqtt_serde::{MQTT_V311, MQTT_V5};

    #[test]
    fn test_connect_v311_minimal_bytes() {
        let bytes = MqttConnect::new("c1", 60, true, MQTT_V311).to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x10, 0x0e, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // level
                0x02, // clean session
                0x00, 0x3c, // keep alive
                0x00, 0x02, b'c', b'1', // client id
            ]
        );
        assert_eq!(MqttConnect::decode(&bytes[2..]).unwrap().client_id, "c1");
    }

    #[test]
    fn test_connect_v5_with_will_roundtrip() {
        let mut will = Will::new("status/c9", b"offline".to_vec(), 1, true);
        will.properties = vec![Property::WillDelayInterval(5)];
        let connect = MqttConnect::new("c9", 30, false, MQTT_V5)
            .with_credentials(Some("user".to_string()), Some(b"secret".to_vec()))
            .with_will(will)
            .with_properties(vec![
                Property::SessionExpiryInterval(120),
                Property::ReceiveMaximum(10),
            ]);
        let bytes = connect.to_bytes().unwrap();
        // username | password | will retain | will qos 1 | will
        assert_eq!(bytes[8], 0x05);
        assert_eq!(bytes[9], 0x80 | 0x40 | 0x20 | 0x08 | 0x04);
        assert_eq!(MqttConnect::decode(&bytes[2..]).unwrap(), connect);
    }

    #[test]
    fn test_connect_v311_password_without_username() {
        let connect =
            MqttConnect::new("c1", 60, true, MQTT_V311).with_credentials(None, Some(b"p".to_vec()));
        assert!(matches!(
            connect.to_bytes(),
            Err(ParseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_connect_decode_rejects_bad_header() {
        let mut body = encode_utf8_string("MQIsdp").unwrap();
        body.extend_from_slice(&[0x03, 0x02, 0x00, 0x3c, 0x00, 0x00]);
        assert!(matches!(
            MqttConnect::decode(&body),
            Err(ParseError::MalformedPacket(_))
        ));

        let mut body = encode_utf8_string("MQTT").unwrap();
        body.extend_from_slice(&[0x03, 0x02, 0x00, 0x3c, 0x00, 0x00]);
        assert_eq!(
            MqttConnect::decode(&body),
            Err(ParseError::UnsupportedProtocolVersion(3))
        );

        let mut body = encode_utf8_string("MQTT").unwrap();
        body.extend_from_slice(&[0x04, 0x03, 0x00, 0x3c, 0x00, 0x00]);
        assert!(matches!(
            MqttConnect::decode(&body),
            Err(ParseError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_connect_unsupported_version_on_encode() {
        assert_eq!(
            MqttConnect::new("c1", 60, true, 3).to_bytes(),
            Err(ParseError::UnsupportedProtocolVersion(3))
        );
    }
}
