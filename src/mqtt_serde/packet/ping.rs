// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket};
use crate::mqtt_serde::parser::ParseError;

#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct MqttPingReq {}

#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct MqttPingResp {}

fn expect_empty(body: &[u8], name: &str) -> Result<(), ParseError> {
    if !body.is_empty() {
        return Err(ParseError::malformed(format!(
            "{} must have remaining length 0, got {}",
            name,
            body.len()
        )));
    }
    Ok(())
}

impl MqttPingReq {
    pub fn new() -> Self {
        Self {}
    }

    pub fn decode(body: &[u8]) -> Result<Self, ParseError> {
        expect_empty(body, "PINGREQ")?;
        Ok(Self {})
    }
}

impl MqttPingResp {
    pub fn new() -> Self {
        Self {}
    }

    pub fn decode(body: &[u8]) -> Result<Self, ParseError> {
        expect_empty(body, "PINGRESP")?;
        Ok(Self {})
    }
}

impl MqttControlPacket for MqttPingReq {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::PINGREQ
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        Ok(Vec::new())
    }
}

impl MqttControlPacket for MqttPingResp {
    fn control_packet_type(&self) -> ControlPacketType {
        ControlPacketType::PINGRESP
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_bytes() {
        assert_eq!(MqttPingReq::new().to_bytes().unwrap(), vec![0xc0, 0x00]);
        assert_eq!(MqttPingResp::new().to_bytes().unwrap(), vec![0xd0, 0x00]);
        assert!(MqttPingResp::decode(&[0x00]).is_err());
    }
}
