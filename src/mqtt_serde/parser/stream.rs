// SPDX-License-Identifier: MPL-2.0

use bytes::BytesMut;

use crate::mqtt_serde::control_packet::MqttPacket;
use crate::mqtt_serde::parser::{next_packet_length, ParseError};
use crate::mqtt_serde::MQTT_V311;

/// Type byte plus a four-byte remaining length.
const MAX_FIXED_HEADER: usize = 5;

/// A stateful parser for a stream of MQTT data.
///
/// Bytes arrive from the QUIC stream in arbitrary slices: a packet may be split
/// across reads and one read may carry several packets. The parser buffers
/// until `next_packet_length` reports a complete frame, then decodes exactly
/// that frame.
#[derive(Debug)]
pub struct MqttParser {
    buffer: BytesMut,
    mqtt_version: u8,
}

impl Default for MqttParser {
    fn default() -> Self {
        Self::new(16384, MQTT_V311)
    }
}

impl MqttParser {
    pub fn new(buffer_size: usize, mqtt_version: u8) -> Self {
        MqttParser {
            buffer: BytesMut::with_capacity(buffer_size),
            mqtt_version,
        }
    }

    pub fn mqtt_version(&self) -> u8 {
        self.mqtt_version
    }

    pub fn set_mqtt_version(&mut self, mqtt_version: u8) {
        self.mqtt_version = mqtt_version;
    }

    /// Appends new data from the stream to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a packet.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Attempts to parse a single MQTT packet from the internal buffer.
    ///
    /// - If a full packet is available, it returns `Ok(Some(MqttPacket))`,
    ///   and the corresponding bytes are removed from the buffer.
    /// - If the buffer does not contain a full packet, it returns `Ok(None)`.
    /// - If the data in the buffer is malformed, it returns `Err(ParseError)`.
    ///   The offending frame is dropped so the caller may decide to continue.
    pub fn next_packet(&mut self) -> Result<Option<MqttPacket>, ParseError> {
        self.next_packet_with_frame().map_err(|(e, _)| e)
    }

    /// Like [`next_packet`](Self::next_packet), but a failure also returns the
    /// bytes that failed: the dropped frame, or the fixed header prefix when
    /// the length itself is invalid.
    pub fn next_packet_with_frame(
        &mut self,
    ) -> Result<Option<MqttPacket>, (ParseError, Vec<u8>)> {
        let total = match next_packet_length(&self.buffer) {
            Ok(Some(total)) => total,
            Ok(None) => return Ok(None),
            Err(e) => {
                let head = self.buffer.len().min(MAX_FIXED_HEADER);
                return Err((e, self.buffer[..head].to_vec()));
            }
        };
        let frame = self.buffer.split_to(total).freeze();
        match MqttPacket::from_bytes_with_version(&frame, self.mqtt_version) {
            Ok((packet, _)) => Ok(Some(packet)),
            Err(e) => Err((e, frame.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_serde::builders::{build_pingreq, build_publish};
    use crate::mqtt_serde::MQTT_V5;

    #[test]
    fn test_byte_by_byte_feed() {
        let bytes = build_publish("a/b", b"hello", 1, false, 9, MQTT_V5).unwrap();
        let mut parser = MqttParser::new(64, MQTT_V5);
        for (i, b) in bytes.iter().enumerate() {
            parser.feed(std::slice::from_ref(b));
            let res = parser.next_packet().unwrap();
            if i + 1 < bytes.len() {
                assert!(res.is_none());
            } else {
                match res {
                    Some(MqttPacket::Publish(p)) => assert_eq!(p.payload, b"hello"),
                    other => panic!("unexpected {:?}", other),
                }
            }
        }
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn test_concatenated_packets() {
        let mut data = build_pingreq().unwrap();
        data.extend(build_publish("t", b"1", 0, false, 0, MQTT_V311).unwrap());
        data.push(0x30);

        let mut parser = MqttParser::default();
        parser.feed(&data);
        assert!(matches!(parser.next_packet(), Ok(Some(MqttPacket::PingReq(_)))));
        assert!(matches!(parser.next_packet(), Ok(Some(MqttPacket::Publish(_)))));
        assert!(matches!(parser.next_packet(), Ok(None)));
        assert_eq!(parser.buffered_len(), 1);
    }

    #[test]
    fn test_malformed_frame_is_consumed() {
        let mut parser = MqttParser::default();
        // PINGRESP with a body, then a valid PINGRESP
        parser.feed(&[0xd0, 0x01, 0x00, 0xd0, 0x00]);
        assert!(matches!(
            parser.next_packet(),
            Err(ParseError::MalformedPacket(_))
        ));
        assert!(matches!(parser.next_packet(), Ok(Some(MqttPacket::PingResp(_)))));
    }

    #[test]
    fn test_failure_returns_offending_frame() {
        let mut parser = MqttParser::default();
        // CONNACK with a reserved flag bit, then a valid PINGRESP
        parser.feed(&[0x21, 0x02, 0x00, 0x00, 0xd0, 0x00]);
        match parser.next_packet_with_frame() {
            Err((_, frame)) => assert_eq!(frame, vec![0x21, 0x02, 0x00, 0x00]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            parser.next_packet_with_frame(),
            Ok(Some(MqttPacket::PingResp(_)))
        ));

        // remaining length that never terminates
        parser.feed(&[0x30, 0xff, 0xff, 0xff, 0xff, 0x01]);
        match parser.next_packet_with_frame() {
            Err((_, head)) => assert_eq!(head, vec![0x30, 0xff, 0xff, 0xff, 0xff]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
