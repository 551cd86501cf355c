// SPDX-License-Identifier: MPL-2.0

//! Control packets used by the client core. Each type encodes and decodes both
//! protocol levels; the level travels with the packet where the layout differs.

pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod ping;
pub mod puback;
pub mod publish;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

use crate::mqtt_serde::parser::ParseError;

pub(crate) fn validate_qos(qos: u8) -> Result<u8, ParseError> {
    if qos > 2 {
        return Err(ParseError::InvalidArgument(format!("invalid QoS level {}", qos)));
    }
    Ok(qos)
}

pub(crate) fn is_v5(version: u8) -> bool {
    version == crate::mqtt_serde::MQTT_V5
}
