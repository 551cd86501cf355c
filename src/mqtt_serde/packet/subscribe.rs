// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use super::{is_v5, validate_qos};
use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::{BodyReader, ParseError};
use crate::mqtt_serde::properties::{encode_properties, parse_properties, Properties};
use crate::mqtt_serde::{check_protocol_version, encode_utf8_string};

/// One topic filter with its subscription options. The option bits beyond
/// `qos` are only put on the wire for MQTT 5.0.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct TopicSubscription {
    pub topic_filter: String,
    pub qos: u8,
    #[serde(default)]
    pub no_local: bool,
    #[serde(default)]
    pub retain_as_published: bool,
    #[serde(default)]
    pub retain_handling: u8,
}

impl TopicSubscription {
    pub fn new(topic_filter: impl Into<String>, qos: u8) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: 0,
        }
    }

    fn options(&self, v5: bool) -> u8 {
        let mut options = self.qos & 0x03;
        if v5 {
            options |= (self.no_local as u8) << 2;
            options |= (self.retain_as_published as u8) << 3;
            options |= (self.retain_handling & 0x03) << 4;
        }
        options
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttSubscribe {
    pub protocol_version: u8,
    pub packet_id: u16,
    pub subscriptions: Vec<TopicSubscription>,
    #[serde(default)]
    pub properties: Properties,
}

impl MqttSubscribe {
    pub fn new(packet_id: u16, subscriptions: Vec<TopicSubscription>, protocol_version: u8) -> Self {
        Self {
            protocol_version,
            packet_id,
            subscriptions,
            properties: Vec::new(),
        }
    }

    pub fn decode(body: &[u8], protocol_version: u8) -> Result<Self, ParseError> {
        let protocol_version = check_protocol_version(protocol_version)?;
        let v5 = is_v5(protocol_version);
        let mut r = BodyReader::new(body);
        let packet_id = r.u16("packet identifier")?;
        let properties = if v5 { parse_properties(&mut r)? } else { Vec::new() };

        let mut subscriptions = Vec::new();
        while !r.is_empty() {
            let topic_filter = r.utf8("topic filter")?;
            let options = r.u8("subscription options")?;
            let reserved = if v5 { 0xC0 } else { 0xFC };
            if options & reserved != 0 {
                return Err(ParseError::malformed(
                    "reserved subscription option bits are set",
                ));
            }
            let qos = options & 0x03;
            let retain_handling = (options >> 4) & 0x03;
            if qos > 2 || retain_handling > 2 {
                return Err(ParseError::malformed(format!(
                    "invalid subscription options 0x{:02x}",
                    options
                )));
            }
            subscriptions.push(TopicSubscription {
                topic_filter,
                qos,
                no_local: options & 0x04 != 0,
                retain_as_published: options & 0x08 != 0,
                retain_handling,
            });
        }
        if subscriptions.is_empty() {
            return Err(ParseError::malformed("SUBSCRIBE without topic filters"));
        }

        Ok(MqttSubscribe {
            protocol_version,
            packet_id,
            subscriptions,
            properties,
        })
    }
}

impl MqttControlPacket for MqttSubscribe {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::SUBSCRIBE
    }

    // MQTT 3.8.1: reserved flags are 0b0010
    fn flags(&self) -> u8 {
        0x02
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        let version = check_protocol_version(self.protocol_version)?;
        if self.packet_id == 0 {
            return Err(ParseError::InvalidArgument(
                "SUBSCRIBE needs a non-zero packet identifier".to_string(),
            ));
        }
        let mut vh = TwoByteInteger::encode(self.packet_id).to_vec();
        if is_v5(version) {
            vh.extend(encode_properties(&self.properties)?);
        }
        Ok(vh)
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        if self.subscriptions.is_empty() {
            return Err(ParseError::InvalidArgument(
                "SUBSCRIBE needs at least one topic filter".to_string(),
            ));
        }
        let v5 = is_v5(self.protocol_version);
        let mut payload = Vec::new();
        for sub in &self.subscriptions {
            validate_qos(sub.qos)?;
            payload.extend(encode_utf8_string(&sub.topic_filter)?);
            payload.push(sub.options(v5));
        }
        Ok(payload)
    }
}
