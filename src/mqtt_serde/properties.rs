// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::{encode_binary_data, encode_utf8_string, encode_variable_length};

pub type Properties = Vec<Property>;

/// MQTT 5.0 properties (2.2.2.2). Each variant is tied to one property identifier.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum Property {
    PayloadFormatIndicator(u8),
    MessageExpiryInterval(u32),
    ContentType(String),
    ResponseTopic(String),
    CorrelationData(Vec<u8>),
    SubscriptionIdentifier(u32),
    SessionExpiryInterval(u32),
    AssignedClientIdentifier(String),
    ServerKeepAlive(u16),
    AuthenticationMethod(String),
    AuthenticationData(Vec<u8>),
    RequestProblemInformation(u8),
    WillDelayInterval(u32),
    RequestResponseInformation(u8),
    ResponseInformation(String),
    ServerReference(String),
    ReasonString(String),
    ReceiveMaximum(u16),
    TopicAliasMaximum(u16),
    TopicAlias(u16),
    MaximumQoS(u8),
    RetainAvailable(u8),
    UserProperty(String, String),
    MaximumPacketSize(u32),
    WildcardSubscriptionAvailable(u8),
    SubscriptionIdentifierAvailable(u8),
    SharedSubscriptionAvailable(u8),
}

enum Value<'a> {
    Byte(u8),
    TwoByte(u16),
    FourByte(u32),
    Vbi(u32),
    Utf8(&'a str),
    Binary(&'a [u8]),
    Pair(&'a str, &'a str),
}

impl Property {
    pub fn id(&self) -> u8 {
        match self {
            Property::PayloadFormatIndicator(_) => 0x01,
            Property::MessageExpiryInterval(_) => 0x02,
            Property::ContentType(_) => 0x03,
            Property::ResponseTopic(_) => 0x08,
            Property::CorrelationData(_) => 0x09,
            Property::SubscriptionIdentifier(_) => 0x0b,
            Property::SessionExpiryInterval(_) => 0x11,
            Property::AssignedClientIdentifier(_) => 0x12,
            Property::ServerKeepAlive(_) => 0x13,
            Property::AuthenticationMethod(_) => 0x15,
            Property::AuthenticationData(_) => 0x16,
            Property::RequestProblemInformation(_) => 0x17,
            Property::WillDelayInterval(_) => 0x18,
            Property::RequestResponseInformation(_) => 0x19,
            Property::ResponseInformation(_) => 0x1a,
            Property::ServerReference(_) => 0x1c,
            Property::ReasonString(_) => 0x1f,
            Property::ReceiveMaximum(_) => 0x21,
            Property::TopicAliasMaximum(_) => 0x22,
            Property::TopicAlias(_) => 0x23,
            Property::MaximumQoS(_) => 0x24,
            Property::RetainAvailable(_) => 0x25,
            Property::UserProperty(..) => 0x26,
            Property::MaximumPacketSize(_) => 0x27,
            Property::WildcardSubscriptionAvailable(_) => 0x28,
            Property::SubscriptionIdentifierAvailable(_) => 0x29,
            Property::SharedSubscriptionAvailable(_) => 0x2a,
        }
    }

    fn value(&self) -> Value<'_> {
        match self {
            Property::PayloadFormatIndicator(v)
            | Property::RequestProblemInformation(v)
            | Property::RequestResponseInformation(v)
            | Property::MaximumQoS(v)
            | Property::RetainAvailable(v)
            | Property::WildcardSubscriptionAvailable(v)
            | Property::SubscriptionIdentifierAvailable(v)
            | Property::SharedSubscriptionAvailable(v) => Value::Byte(*v),
            Property::ServerKeepAlive(v)
            | Property::ReceiveMaximum(v)
            | Property::TopicAliasMaximum(v)
            | Property::TopicAlias(v) => Value::TwoByte(*v),
            Property::MessageExpiryInterval(v)
            | Property::SessionExpiryInterval(v)
            | Property::WillDelayInterval(v)
            | Property::MaximumPacketSize(v) => Value::FourByte(*v),
            Property::SubscriptionIdentifier(v) => Value::Vbi(*v),
            Property::ContentType(v)
            | Property::ResponseTopic(v)
            | Property::AssignedClientIdentifier(v)
            | Property::AuthenticationMethod(v)
            | Property::ResponseInformation(v)
            | Property::ServerReference(v)
            | Property::ReasonString(v) => Value::Utf8(v),
            Property::CorrelationData(v) | Property::AuthenticationData(v) => Value::Binary(v),
            Property::UserProperty(k, v) => Value::Pair(k, v),
        }
    }

    fn encode(&self, bytes: &mut Vec<u8>) -> Result<(), ParseError> {
        bytes.push(self.id());
        match self.value() {
            Value::Byte(v) => bytes.push(v),
            Value::TwoByte(v) => bytes.extend_from_slice(&v.to_be_bytes()),
            Value::FourByte(v) => bytes.extend_from_slice(&v.to_be_bytes()),
            Value::Vbi(v) => bytes.extend(encode_variable_length(v as usize)?),
            Value::Utf8(s) => bytes.extend(encode_utf8_string(s)?),
            Value::Binary(b) => bytes.extend(encode_binary_data(b)?),
            Value::Pair(k, v) => {
                bytes.extend(encode_utf8_string(k)?);
                bytes.extend(encode_utf8_string(v)?);
            }
        }
        Ok(())
    }

    fn decode(id: usize, r: &mut BodyReader<'_>) -> Result<Property, ParseError> {
        const W: &str = "property value";
        let property = match id {
            0x01 => Property::PayloadFormatIndicator(r.u8(W)?),
            0x02 => Property::MessageExpiryInterval(r.u32(W)?),
            0x03 => Property::ContentType(r.utf8(W)?),
            0x08 => Property::ResponseTopic(r.utf8(W)?),
            0x09 => Property::CorrelationData(r.binary(W)?),
            0x0b => Property::SubscriptionIdentifier(r.vbi(W)? as u32),
            0x11 => Property::SessionExpiryInterval(r.u32(W)?),
            0x12 => Property::AssignedClientIdentifier(r.utf8(W)?),
            0x13 => Property::ServerKeepAlive(r.u16(W)?),
            0x15 => Property::AuthenticationMethod(r.utf8(W)?),
            0x16 => Property::AuthenticationData(r.binary(W)?),
            0x17 => Property::RequestProblemInformation(r.u8(W)?),
            0x18 => Property::WillDelayInterval(r.u32(W)?),
            0x19 => Property::RequestResponseInformation(r.u8(W)?),
            0x1a => Property::ResponseInformation(r.utf8(W)?),
            0x1c => Property::ServerReference(r.utf8(W)?),
            0x1f => Property::ReasonString(r.utf8(W)?),
            0x21 => Property::ReceiveMaximum(r.u16(W)?),
            0x22 => Property::TopicAliasMaximum(r.u16(W)?),
            0x23 => Property::TopicAlias(r.u16(W)?),
            0x24 => Property::MaximumQoS(r.u8(W)?),
            0x25 => Property::RetainAvailable(r.u8(W)?),
            0x26 => {
                let key = r.utf8(W)?;
                let value = r.utf8(W)?;
                Property::UserProperty(key, value)
            }
            0x27 => Property::MaximumPacketSize(r.u32(W)?),
            0x28 => Property::WildcardSubscriptionAvailable(r.u8(W)?),
            0x29 => Property::SubscriptionIdentifierAvailable(r.u8(W)?),
            0x2a => Property::SharedSubscriptionAvailable(r.u8(W)?),
            other => {
                return Err(ParseError::malformed(format!(
                    "unknown property identifier 0x{:02x}",
                    other
                )))
            }
        };
        Ok(property)
    }
}

/// Encodes a property list prefixed with its variable byte integer length.
pub fn encode_properties(properties: &[Property]) -> Result<Vec<u8>, ParseError> {
    let mut props = Vec::new();
    for p in properties {
        p.encode(&mut props)?;
    }
    let mut bytes = encode_variable_length(props.len())?;
    bytes.extend(props);
    Ok(bytes)
}

/// Reads a length-prefixed property list from a packet body.
pub(crate) fn parse_properties(r: &mut BodyReader<'_>) -> Result<Properties, ParseError> {
    let len = r.vbi("property length")?;
    let mut inner = BodyReader::new(r.take(len, "properties")?);
    let mut properties = Vec::new();
    while !inner.is_empty() {
        let id = inner.vbi("property identifier")?;
        properties.push(Property::decode(id, &mut inner)?);
    }
    Ok(properties)
}

/// Convenience lookups used by the session when reading CONNACK/SUBACK.
pub trait PropertiesExt {
    fn reason_string(&self) -> Option<&str>;
    fn assigned_client_identifier(&self) -> Option<&str>;
    fn server_keep_alive(&self) -> Option<u16>;
}

impl PropertiesExt for [Property] {
    fn reason_string(&self) -> Option<&str> {
        self.iter().find_map(|p| match p {
            Property::ReasonString(s) => Some(s.as_str()),
            _ => None,
        })
    }

    fn assigned_client_identifier(&self) -> Option<&str> {
        self.iter().find_map(|p| match p {
            Property::AssignedClientIdentifier(s) => Some(s.as_str()),
            _ => None,
        })
    }

    fn server_keep_alive(&self) -> Option<u16> {
        self.iter().find_map(|p| match p {
            Property::ServerKeepAlive(v) => Some(*v),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_roundtrip() {
        let props = vec![
            Property::SessionExpiryInterval(3600),
            Property::ReceiveMaximum(20),
            Property::SubscriptionIdentifier(16_384),
            Property::UserProperty("region".to_string(), "eu".to_string()),
            Property::CorrelationData(vec![1, 2, 3]),
            Property::ContentType("application/json".to_string()),
        ];
        let bytes = encode_properties(&props).unwrap();
        let mut r = BodyReader::new(&bytes);
        assert_eq!(parse_properties(&mut r).unwrap(), props);
        assert!(r.is_empty());
    }

    #[test]
    fn test_empty_properties() {
        assert_eq!(encode_properties(&[]).unwrap(), vec![0x00]);
        let mut r = BodyReader::new(&[0x00]);
        assert!(parse_properties(&mut r).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_property_id() {
        let mut r = BodyReader::new(&[0x02, 0x7f, 0x00]);
        assert!(matches!(
            parse_properties(&mut r),
            Err(ParseError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_property_length_exceeds_body() {
        // claims 5 bytes of properties, only 2 follow
        let mut r = BodyReader::new(&[0x05, 0x24, 0x01]);
        assert!(matches!(
            parse_properties(&mut r),
            Err(ParseError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_lookup_helpers() {
        let props = vec![
            Property::ServerKeepAlive(30),
            Property::AssignedClientIdentifier("auto-1".to_string()),
        ];
        assert_eq!(props.server_keep_alive(), Some(30));
        assert_eq!(props.assigned_client_identifier(), Some("auto-1"));
        assert_eq!(props.reason_string(), None);
    }
}
