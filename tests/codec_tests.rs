// SPDX-License-Identifier: MPL-2.0

// Wire codec checks against hand-assembled frames.

use flowsdk_quic::mqtt_serde::control_packet::{MqttControlPacket, MqttPacket};
use flowsdk_quic::mqtt_serde::packet::connack::MqttConnAck;
use flowsdk_quic::mqtt_serde::parser::ParseError;
use flowsdk_quic::mqtt_serde::properties::{PropertiesExt, Property};
use flowsdk_quic::mqtt_serde::{
    build_connect, build_disconnect, build_pingreq, build_publish, build_subscribe,
    decode_remaining_length, decode_string, encode_remaining_length, encode_string,
    next_packet_length, MqttParser, MQTT_V311, MQTT_V5,
};

#[test]
fn test_connect_v311_exact_bytes() {
    let bytes = build_connect("c1", "u", "p", 90, true).unwrap();
    assert_eq!(hex::encode(&bytes), "101400044d51545404c2005a00026331000175000170");
    assert_eq!(bytes.len(), 22);
}

#[test]
fn test_remaining_length_boundaries() {
    let cases: &[(usize, &[u8])] = &[
        (0, &[0x00]),
        (127, &[0x7f]),
        (128, &[0x80, 0x01]),
        (16_383, &[0xff, 0x7f]),
        (16_384, &[0x80, 0x80, 0x01]),
        (2_097_151, &[0xff, 0xff, 0x7f]),
        (2_097_152, &[0x80, 0x80, 0x80, 0x01]),
        (268_435_455, &[0xff, 0xff, 0xff, 0x7f]),
    ];
    for (value, encoded) in cases {
        assert_eq!(encode_remaining_length(*value).unwrap(), *encoded, "{}", value);
        assert_eq!(
            decode_remaining_length(encoded, 0).unwrap(),
            (*value, encoded.len())
        );
    }
    assert!(matches!(
        encode_remaining_length(268_435_456),
        Err(ParseError::InvalidArgument(_))
    ));
}

#[test]
fn test_remaining_length_fifth_digit_rejected() {
    let err = decode_remaining_length(&[0x30, 0xff, 0xff, 0xff, 0xff, 0x01], 1).unwrap_err();
    assert!(!err.is_incomplete());
}

#[test]
fn test_remaining_length_truncated_is_incomplete() {
    let err = decode_remaining_length(&[0x80, 0x80], 0).unwrap_err();
    assert!(err.is_incomplete());
}

#[test]
fn test_next_packet_length() {
    let connack = [0x20, 0x02, 0x00, 0x00];
    assert_eq!(next_packet_length(&connack).unwrap(), Some(4));
    assert_eq!(next_packet_length(&connack[..3]).unwrap(), None);
    assert_eq!(next_packet_length(&[]).unwrap(), None);
    assert_eq!(next_packet_length(&[0x30, 0x80]).unwrap(), None);

    let mut two = connack.to_vec();
    two.extend_from_slice(&[0xc0, 0x00]);
    assert_eq!(next_packet_length(&two).unwrap(), Some(4));

    assert!(next_packet_length(&[0x30, 0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
}

#[test]
fn test_string_encoding() {
    let encoded = encode_string("a/b").unwrap();
    assert_eq!(encoded, [0x00, 0x03, b'a', b'/', b'b']);

    let mut framed = vec![0xaa];
    framed.extend_from_slice(&encoded);
    assert_eq!(decode_string(&framed, 1).unwrap(), ("a/b".to_string(), 5));

    assert!(decode_string(&[0x00, 0x05, b'a'], 0)
        .unwrap_err()
        .is_incomplete());
    assert!(matches!(
        decode_string(&[0x00, 0x02, 0xc3, 0x28], 0),
        Err(ParseError::Utf8Error(_))
    ));
}

#[test]
fn test_v5_connack_with_properties() {
    let frame = hex::decode("200f00000c1200066175746f2d3113001e").unwrap();
    let (packet, consumed) = MqttPacket::from_bytes_with_version(&frame, MQTT_V5).unwrap();
    assert_eq!(consumed, frame.len());
    match packet {
        MqttPacket::ConnAck(ack) => {
            assert!(ack.is_success());
            assert!(!ack.session_present);
            assert_eq!(ack.properties.assigned_client_identifier(), Some("auto-1"));
            assert_eq!(ack.properties.server_keep_alive(), Some(30));
        }
        other => panic!("expected CONNACK, got {:?}", other),
    }
}

#[test]
fn test_v311_connack_session_present() {
    let bytes = MqttConnAck::new(true, 0, MQTT_V311).to_bytes().unwrap();
    assert_eq!(bytes, [0x20, 0x02, 0x01, 0x00]);
}

#[test]
fn test_parser_across_split_reads() {
    let mut stream = build_subscribe(3, "s/#", 1, MQTT_V5).unwrap();
    stream.extend(build_publish("t/1", b"payload", 1, false, 11, MQTT_V5).unwrap());
    stream.extend(build_pingreq().unwrap());
    stream.extend(build_disconnect(MQTT_V5).unwrap());

    let mut parser = MqttParser::new(1024, MQTT_V5);
    let mut names = Vec::new();
    for chunk in stream.chunks(5) {
        parser.feed(chunk);
        while let Some(packet) = parser.next_packet().unwrap() {
            names.push(packet.name());
        }
    }
    assert_eq!(names, ["SUBSCRIBE", "PUBLISH", "PINGREQ", "DISCONNECT"]);
    assert_eq!(parser.buffered_len(), 0);
}

#[test]
fn test_parser_skips_malformed_frame() {
    let mut stream = vec![0x20, 0x03, 0x00, 0x00, 0x00];
    // CONNACK with a reserved flag bit set
    stream[0] = 0x21;
    stream.extend(build_pingreq().unwrap());

    let mut parser = MqttParser::new(64, MQTT_V311);
    parser.feed(&stream);
    assert!(parser.next_packet().is_err());
    assert!(matches!(parser.next_packet(), Ok(Some(MqttPacket::PingReq(_)))));
}

#[test]
fn test_packet_json_is_tagged() {
    let bytes = build_publish("x/y", b"hi", 1, true, 5, MQTT_V5).unwrap();
    let (packet, _) = MqttPacket::from_bytes_with_version(&bytes, MQTT_V5).unwrap();

    let json = serde_json::to_value(&packet).unwrap();
    assert_eq!(json["type"], "Publish");
    assert_eq!(json["topic_name"], "x/y");
    assert_eq!(json["packet_id"], 5);

    let back: MqttPacket = serde_json::from_value(json).unwrap();
    assert_eq!(back, packet);
}

#[test]
fn test_reason_string_lookup() {
    let props = vec![
        Property::ServerKeepAlive(5),
        Property::ReasonString("busy".to_string()),
    ];
    assert_eq!(props.reason_string(), Some("busy"));
    assert_eq!(props.assigned_client_identifier(), None);
}
