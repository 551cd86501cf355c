// SPDX-License-Identifier: MPL-2.0

//! Stateless MQTT 3.1.1 / 5.0 wire codec.

pub mod base_data;
pub mod builders;
pub mod control_packet;
pub mod packet;
pub mod parser;
pub mod properties;

use crate::mqtt_serde::base_data::{BinaryData, Utf8String, VariableByteInteger};
use crate::mqtt_serde::parser::ParseError;

//re export
pub use crate::mqtt_serde::builders::*;
pub use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket, MqttPacket};
pub use crate::mqtt_serde::parser::stream::MqttParser;
pub use crate::mqtt_serde::parser::{next_packet_length, parse_fixed_header, FixedHeader};

/// Protocol level of MQTT 3.1.1.
pub const MQTT_V311: u8 = 4;
/// Protocol level of MQTT 5.0.
pub const MQTT_V5: u8 = 5;

/// Encodes `len` as a remaining-length variable byte integer (1-4 bytes).
pub fn encode_remaining_length(len: usize) -> Result<Vec<u8>, ParseError> {
    VariableByteInteger::encode(len)
}

/// Decodes the remaining length starting at `offset`; returns `(value, digits consumed)`.
pub fn decode_remaining_length(buf: &[u8], offset: usize) -> Result<(usize, usize), ParseError> {
    VariableByteInteger::decode(buf.get(offset..).unwrap_or(&[]))
}

/// 2-byte big-endian length prefix followed by the UTF-8 bytes.
pub fn encode_string(s: &str) -> Result<Vec<u8>, ParseError> {
    encode_utf8_string(s)
}

/// Decodes a length-prefixed UTF-8 string at `offset`; returns `(string, bytes consumed)`.
pub fn decode_string(buf: &[u8], offset: usize) -> Result<(String, usize), ParseError> {
    Utf8String::decode(buf.get(offset..).unwrap_or(&[]))
}

// MQTT 5.0 Spec, 1.5.6
pub(crate) fn encode_binary_data(data: &[u8]) -> Result<Vec<u8>, ParseError> {
    BinaryData::encode(data)
}

// MQTT 5.0 Spec, 1.5.4
pub(crate) fn encode_utf8_string(s: &str) -> Result<Vec<u8>, ParseError> {
    #[cfg(feature = "strict-protocol-compliance")]
    if s.contains('\u{0000}') {
        return Err(ParseError::InvalidArgument(
            "UTF-8 string contains null character (U+0000)".to_string(),
        ));
    }
    Utf8String::encode(s)
}

pub(crate) fn encode_variable_length(len: usize) -> Result<Vec<u8>, ParseError> {
    VariableByteInteger::encode(len)
}

pub(crate) fn check_protocol_version(version: u8) -> Result<u8, ParseError> {
    match version {
        MQTT_V311 | MQTT_V5 => Ok(version),
        other => Err(ParseError::UnsupportedProtocolVersion(other)),
    }
}
