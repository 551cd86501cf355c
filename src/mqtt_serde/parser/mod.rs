// SPDX-License-Identifier: MPL-2.0

use crate::mqtt_serde::base_data::{BinaryData, TwoByteInteger, Utf8String, VariableByteInteger};
use std::error::Error;
use std::fmt;

pub mod stream;

// First byte of Fixed header
pub const FIXED_HDR_LEN: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not enough bytes yet; the hint is how many more are needed at minimum.
    /// Not fatal for stream framing.
    InsufficientData(usize, String),
    /// Variable byte integer would need a 5th digit.
    InvalidEncoding(String),
    /// Encoder input outside what the wire format can carry.
    InvalidArgument(String),
    Utf8Error(std::str::Utf8Error),
    InvalidPacketType(u8),
    MalformedPacket(String),
    UnsupportedProtocolVersion(u8),
}

impl ParseError {
    /// `true` when the error only means "feed more bytes".
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::InsufficientData(..))
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ParseError::MalformedPacket(msg.into())
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::InsufficientData(hint, msg) => {
                write!(f, "More data needed ({} bytes): {}", hint, msg)
            }
            ParseError::InvalidEncoding(msg) => write!(f, "Invalid encoding: {}", msg),
            ParseError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            ParseError::Utf8Error(e) => write!(f, "UTF-8 Error: {}", e),
            ParseError::InvalidPacketType(t) => write!(f, "Invalid Packet Type: {}", t),
            ParseError::MalformedPacket(msg) => write!(f, "Malformed packet: {}", msg),
            ParseError::UnsupportedProtocolVersion(v) => {
                write!(f, "Unsupported Protocol Version: {}", v)
            }
        }
    }
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ParseError::Utf8Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Decoded MQTT fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    /// Packet type in the high nibble, flags in the low nibble.
    pub first_byte: u8,
    pub remaining_length: usize,
    /// Bytes taken by the fixed header itself (1 + length digits).
    pub header_len: usize,
}

impl FixedHeader {
    pub fn packet_type(&self) -> u8 {
        self.first_byte >> 4
    }

    pub fn flags(&self) -> u8 {
        self.first_byte & 0x0F
    }

    pub fn total_len(&self) -> usize {
        self.header_len + self.remaining_length
    }
}

pub fn packet_type(buffer: &[u8]) -> Result<u8, ParseError> {
    match buffer.first() {
        Some(b) => Ok(b >> 4),
        None => Err(ParseError::InsufficientData(
            1,
            "packet type byte".to_string(),
        )),
    }
}

/// Decodes type byte and remaining length. Does not require the body to be present.
pub fn parse_fixed_header(buffer: &[u8]) -> Result<FixedHeader, ParseError> {
    let first_byte = *buffer.first().ok_or(ParseError::InsufficientData(
        2,
        "fixed header".to_string(),
    ))?;
    let (remaining_length, digits) = parse_remaining_length(&buffer[FIXED_HDR_LEN..])?;
    Ok(FixedHeader {
        first_byte,
        remaining_length,
        header_len: FIXED_HDR_LEN + digits,
    })
}

/// Total framed length of the packet at the head of `buffer`.
///
/// `Ok(None)` means the buffer does not yet hold a complete packet. Malformed
/// length encodings are the only error.
pub fn next_packet_length(buffer: &[u8]) -> Result<Option<usize>, ParseError> {
    match parse_fixed_header(buffer) {
        Ok(header) if buffer.len() >= header.total_len() => Ok(Some(header.total_len())),
        Ok(_) => Ok(None),
        Err(e) if e.is_incomplete() => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn parse_remaining_length(buffer: &[u8]) -> Result<(usize, usize), ParseError> {
    VariableByteInteger::decode(buffer)
}

// 1.5.4 UTF-8 Encoded String
pub fn parse_utf8_string(buffer: &[u8]) -> Result<(String, usize), ParseError> {
    Utf8String::decode(buffer)
}

pub fn parse_packet_id(buffer: &[u8]) -> Result<(u16, usize), ParseError> {
    TwoByteInteger::decode(buffer)
}

pub fn parse_binary_data(buffer: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    BinaryData::decode(buffer)
}

/// Cursor over one packet body. Running past the end of the body means the
/// remaining length lied about the content, so shortfalls become `MalformedPacket`.
pub(crate) struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        BodyReader { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn track<T>(&mut self, res: Result<(T, usize), ParseError>, what: &str) -> Result<T, ParseError> {
        match res {
            Ok((value, consumed)) => {
                self.pos += consumed;
                Ok(value)
            }
            Err(e) if e.is_incomplete() => Err(ParseError::malformed(format!(
                "{} exceeds remaining length",
                what
            ))),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn u8(&mut self, what: &str) -> Result<u8, ParseError> {
        let b = *self.buf.get(self.pos).ok_or_else(|| {
            ParseError::malformed(format!("{} exceeds remaining length", what))
        })?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn u16(&mut self, what: &str) -> Result<u16, ParseError> {
        let res = TwoByteInteger::decode(self.rest());
        self.track(res, what)
    }

    pub(crate) fn u32(&mut self, what: &str) -> Result<u32, ParseError> {
        let res = crate::mqtt_serde::base_data::FourByteInteger::decode(self.rest());
        self.track(res, what)
    }

    pub(crate) fn vbi(&mut self, what: &str) -> Result<usize, ParseError> {
        let res = VariableByteInteger::decode(self.rest());
        self.track(res, what)
    }

    pub(crate) fn utf8(&mut self, what: &str) -> Result<String, ParseError> {
        let res = Utf8String::decode(self.rest());
        self.track(res, what)
    }

    pub(crate) fn binary(&mut self, what: &str) -> Result<Vec<u8>, ParseError> {
        let res = BinaryData::decode(self.rest());
        self.track(res, what)
    }

    pub(crate) fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], ParseError> {
        if self.remaining() < len {
            return Err(ParseError::malformed(format!(
                "{} exceeds remaining length",
                what
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn take_rest(&mut self) -> &'a [u8] {
        let slice = self.rest();
        self.pos = self.buf.len();
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_header() {
        let header = parse_fixed_header(&[0x30, 0x80, 0x01]).unwrap();
        assert_eq!(header.packet_type(), 3);
        assert_eq!(header.flags(), 0);
        assert_eq!(header.remaining_length, 128);
        assert_eq!(header.header_len, 3);
        assert_eq!(header.total_len(), 131);

        assert!(parse_fixed_header(&[]).unwrap_err().is_incomplete());
        assert!(parse_fixed_header(&[0x30]).unwrap_err().is_incomplete());
        assert!(parse_fixed_header(&[0x30, 0x80]).unwrap_err().is_incomplete());
    }

    #[test]
    fn test_next_packet_length_connack() {
        let connack = [0x20, 0x02, 0x00, 0x00];
        assert_eq!(next_packet_length(&connack).unwrap(), Some(4));
        assert_eq!(next_packet_length(&connack[..3]).unwrap(), None);
        assert_eq!(next_packet_length(&connack[..1]).unwrap(), None);
        assert_eq!(next_packet_length(&[]).unwrap(), None);
    }

    #[test]
    fn test_next_packet_length_concatenated() {
        // CONNACK followed by the head of a PINGRESP
        let buf = [0x20, 0x02, 0x00, 0x00, 0xd0];
        assert_eq!(next_packet_length(&buf).unwrap(), Some(4));
        assert_eq!(next_packet_length(&buf[4..]).unwrap(), None);
    }

    #[test]
    fn test_next_packet_length_bad_encoding() {
        let buf = [0x30, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert!(matches!(
            next_packet_length(&buf),
            Err(ParseError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_body_reader_shortfall_is_malformed() {
        let mut r = BodyReader::new(&[0x00, 0x05, b'a']);
        assert!(matches!(r.utf8("topic"), Err(ParseError::MalformedPacket(_))));
        let mut r = BodyReader::new(&[0x12]);
        assert!(matches!(r.u16("packet id"), Err(ParseError::MalformedPacket(_))));
    }
}
