// SPDX-License-Identifier: MPL-2.0

use crate::mqtt_serde::parser::ParseError;

/// Largest value a 4-digit variable byte integer can carry.
pub const MAX_VARIABLE_BYTE_INTEGER: usize = 268_435_455;

pub struct TwoByteInteger;

impl TwoByteInteger {
    pub fn encode(val: u16) -> [u8; 2] {
        val.to_be_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<(u16, usize), ParseError> {
        match bytes.get(0..2) {
            Some(b) => Ok((u16::from_be_bytes([b[0], b[1]]), 2)),
            None => Err(ParseError::InsufficientData(
                2 - bytes.len(),
                "two byte integer".to_string(),
            )),
        }
    }
}

pub struct FourByteInteger;

impl FourByteInteger {
    pub fn encode(val: u32) -> [u8; 4] {
        val.to_be_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<(u32, usize), ParseError> {
        match bytes.get(0..4) {
            Some(b) => Ok((u32::from_be_bytes([b[0], b[1], b[2], b[3]]), 4)),
            None => Err(ParseError::InsufficientData(
                4 - bytes.len(),
                "four byte integer".to_string(),
            )),
        }
    }
}

pub struct VariableByteInteger;

impl VariableByteInteger {
    pub fn encode(val: usize) -> Result<Vec<u8>, ParseError> {
        if val > MAX_VARIABLE_BYTE_INTEGER {
            return Err(ParseError::InvalidArgument(format!(
                "{} exceeds the variable byte integer maximum {}",
                val, MAX_VARIABLE_BYTE_INTEGER
            )));
        }
        let mut bytes = Vec::with_capacity(4);
        let mut num = val;
        loop {
            let mut byte = (num % 128) as u8;
            num /= 128;
            if num > 0 {
                byte |= 0x80;
            }
            bytes.push(byte);
            if num == 0 {
                break;
            }
        }
        Ok(bytes)
    }

    pub fn decode(buffer: &[u8]) -> Result<(usize, usize), ParseError> {
        let mut multiplier = 1usize;
        let mut value = 0usize;

        for i in 0..4 {
            let byte = *buffer.get(i).ok_or(ParseError::InsufficientData(
                1,
                "vbi: not enough bytes for remaining length".to_string(),
            ))?;
            value += (byte & 0x7F) as usize * multiplier;
            multiplier *= 128;

            if byte & 0x80 == 0 {
                let consumed = i + 1;

                #[cfg(feature = "strict-protocol-compliance")]
                if VariableByteInteger::encode(value)?.len() != consumed {
                    return Err(ParseError::InvalidEncoding(
                        "Variable Byte Integer encoding is not minimal".to_string(),
                    ));
                }

                return Ok((value, consumed));
            }
        }

        // continuation bit still set on the 4th digit
        Err(ParseError::InvalidEncoding(
            "variable byte integer needs a 5th digit".to_string(),
        ))
    }
}

pub struct BinaryData;

impl BinaryData {
    pub fn encode(data: &[u8]) -> Result<Vec<u8>, ParseError> {
        if data.len() > u16::MAX as usize {
            return Err(ParseError::InvalidArgument(format!(
                "{} bytes exceed the 65535 byte limit of length-prefixed data",
                data.len()
            )));
        }
        let mut bytes = Vec::with_capacity(2 + data.len());
        bytes.extend_from_slice(&(data.len() as u16).to_be_bytes());
        bytes.extend_from_slice(data);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
        let (len, _) = TwoByteInteger::decode(bytes)?;
        let end = 2 + len as usize;
        if bytes.len() < end {
            return Err(ParseError::InsufficientData(
                end - bytes.len(),
                "length-prefixed data".to_string(),
            ));
        }
        Ok((bytes[2..end].to_vec(), end))
    }
}

pub struct Utf8String;

impl Utf8String {
    pub fn encode(s: &str) -> Result<Vec<u8>, ParseError> {
        BinaryData::encode(s.as_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<(String, usize), ParseError> {
        let (data, len) = BinaryData::decode(bytes)?;
        let s = String::from_utf8(data).map_err(|e| ParseError::Utf8Error(e.utf8_error()))?;
        Ok((s, len))
    }
}

pub struct Utf8StringPair;

impl Utf8StringPair {
    pub fn encode(key: &str, value: &str) -> Result<Vec<u8>, ParseError> {
        let mut bytes = Utf8String::encode(key)?;
        bytes.extend(Utf8String::encode(value)?);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<((String, String), usize), ParseError> {
        let (key, key_len) = Utf8String::decode(bytes)?;
        let (value, value_len) = Utf8String::decode(&bytes[key_len..])?;
        Ok(((key, value), key_len + value_len))
    }
}
