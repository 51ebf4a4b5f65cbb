//! Token types and values.
//!
//! A token is one `(id, type, value)` slot of a token stream:
//!
//! ```text
//! +-----------+----------+--------------------------------------+
//! | header id | type tag | payload                              |
//! | u16 LE    | u8       | fixed width, or length prefix + data |
//! +-----------+----------+--------------------------------------+
//! ```

use crate::error::{ensure_remaining, ProtocolError};
use crate::guid::{self, GUID_SIZE};
use crate::registry::HeaderDescriptor;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use uuid::Uuid;

/// Size of the id and type tag that precede every token payload.
pub const TOKEN_HEADER_SIZE: usize = 3;

/// Wire type tag of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    Byte = 0x00,
    UShort = 0x01,
    ULong = 0x02,
    Long = 0x03,
    ULongLong = 0x04,
    LongLong = 0x05,
    Guid = 0x06,
    SmallString = 0x07,
    String = 0x08,
    ULongString = 0x09,
    SmallBytes = 0x0A,
    Bytes = 0x0B,
    ULongBytes = 0x0C,
    Float = 0x0D,
    Double = 0x0E,
}

impl TokenType {
    pub fn from_id(id: u8) -> Result<Self, ProtocolError> {
        let token_type = match id {
            0x00 => TokenType::Byte,
            0x01 => TokenType::UShort,
            0x02 => TokenType::ULong,
            0x03 => TokenType::Long,
            0x04 => TokenType::ULongLong,
            0x05 => TokenType::LongLong,
            0x06 => TokenType::Guid,
            0x07 => TokenType::SmallString,
            0x08 => TokenType::String,
            0x09 => TokenType::ULongString,
            0x0A => TokenType::SmallBytes,
            0x0B => TokenType::Bytes,
            0x0C => TokenType::ULongBytes,
            0x0D => TokenType::Float,
            0x0E => TokenType::Double,
            other => return Err(ProtocolError::UnknownTokenType(other)),
        };
        Ok(token_type)
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Payload size for fixed-width types.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            TokenType::Byte => Some(1),
            TokenType::UShort => Some(2),
            TokenType::ULong | TokenType::Long | TokenType::Float => Some(4),
            TokenType::ULongLong | TokenType::LongLong | TokenType::Double => Some(8),
            TokenType::Guid => Some(GUID_SIZE),
            _ => None,
        }
    }

    /// Size of the length prefix for variable-width types.
    pub fn length_prefix_size(self) -> Option<usize> {
        match self {
            TokenType::SmallString | TokenType::SmallBytes => Some(1),
            TokenType::String | TokenType::Bytes => Some(2),
            TokenType::ULongString | TokenType::ULongBytes => Some(4),
            _ => None,
        }
    }

    /// Largest value length the length prefix can express.
    pub fn max_value_len(self) -> usize {
        match self.length_prefix_size() {
            Some(1) => u8::MAX as usize,
            Some(2) => u16::MAX as usize,
            Some(_) => u32::MAX as usize,
            None => self.fixed_size().unwrap_or(0),
        }
    }

    pub fn is_string(self) -> bool {
        matches!(
            self,
            TokenType::SmallString | TokenType::String | TokenType::ULongString
        )
    }
}

/// A decoded token value. The variant always matches the wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Byte(u8),
    UShort(u16),
    ULong(u32),
    Long(i32),
    ULongLong(u64),
    LongLong(i64),
    Guid(Uuid),
    SmallString(String),
    String(String),
    ULongString(String),
    SmallBytes(Bytes),
    Bytes(Bytes),
    ULongBytes(Bytes),
    Float(f32),
    Double(f64),
}

impl TokenValue {
    pub fn token_type(&self) -> TokenType {
        match self {
            TokenValue::Byte(_) => TokenType::Byte,
            TokenValue::UShort(_) => TokenType::UShort,
            TokenValue::ULong(_) => TokenType::ULong,
            TokenValue::Long(_) => TokenType::Long,
            TokenValue::ULongLong(_) => TokenType::ULongLong,
            TokenValue::LongLong(_) => TokenType::LongLong,
            TokenValue::Guid(_) => TokenType::Guid,
            TokenValue::SmallString(_) => TokenType::SmallString,
            TokenValue::String(_) => TokenType::String,
            TokenValue::ULongString(_) => TokenType::ULongString,
            TokenValue::SmallBytes(_) => TokenType::SmallBytes,
            TokenValue::Bytes(_) => TokenType::Bytes,
            TokenValue::ULongBytes(_) => TokenType::ULongBytes,
            TokenValue::Float(_) => TokenType::Float,
            TokenValue::Double(_) => TokenType::Double,
        }
    }

    /// Builds a string-typed value of the given wire type.
    pub fn string(token_type: TokenType, value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        match token_type {
            TokenType::SmallString => Some(TokenValue::SmallString(value)),
            TokenType::String => Some(TokenValue::String(value)),
            TokenType::ULongString => Some(TokenValue::ULongString(value)),
            _ => None,
        }
    }

    /// Parses a textual header value into the given wire type.
    pub fn parse(token_type: TokenType, text: &str) -> Option<Self> {
        let text_bytes = || Bytes::copy_from_slice(text.as_bytes());
        let value = match token_type {
            TokenType::Byte => TokenValue::Byte(text.parse().ok()?),
            TokenType::UShort => TokenValue::UShort(text.parse().ok()?),
            TokenType::ULong => TokenValue::ULong(text.parse().ok()?),
            TokenType::Long => TokenValue::Long(text.parse().ok()?),
            TokenType::ULongLong => TokenValue::ULongLong(text.parse().ok()?),
            TokenType::LongLong => TokenValue::LongLong(text.parse().ok()?),
            TokenType::Guid => TokenValue::Guid(Uuid::parse_str(text).ok()?),
            TokenType::SmallString | TokenType::String | TokenType::ULongString => {
                return Self::string(token_type, text)
            }
            TokenType::SmallBytes => TokenValue::SmallBytes(text_bytes()),
            TokenType::Bytes => TokenValue::Bytes(text_bytes()),
            TokenType::ULongBytes => TokenValue::ULongBytes(text_bytes()),
            TokenType::Float => TokenValue::Float(text.parse().ok()?),
            TokenType::Double => TokenValue::Double(text.parse().ok()?),
        };
        Some(value)
    }

    /// Length of the variable part (string or byte data), if any.
    pub fn variable_len(&self) -> Option<usize> {
        match self {
            TokenValue::SmallString(s) | TokenValue::String(s) | TokenValue::ULongString(s) => {
                Some(s.len())
            }
            TokenValue::SmallBytes(b) | TokenValue::Bytes(b) | TokenValue::ULongBytes(b) => {
                Some(b.len())
            }
            _ => None,
        }
    }

    /// Encoded payload length, excluding the id and type tag.
    pub fn encoded_len(&self) -> usize {
        let token_type = self.token_type();
        match (token_type.fixed_size(), token_type.length_prefix_size()) {
            (Some(size), _) => size,
            (None, Some(prefix)) => prefix + self.variable_len().unwrap_or(0),
            (None, None) => 0,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            TokenValue::Byte(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            TokenValue::Byte(v) => Some(*v as u32),
            TokenValue::UShort(v) => Some(*v as u32),
            TokenValue::ULong(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TokenValue::SmallString(s) | TokenValue::String(s) | TokenValue::ULongString(s) => {
                Some(s)
            }
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            TokenValue::SmallBytes(b) | TokenValue::Bytes(b) | TokenValue::ULongBytes(b) => {
                Some(b)
            }
            _ => None,
        }
    }

    /// Writes the payload (without id and type tag).
    ///
    /// Variable-width values must already fit their length prefix; `Token::set`
    /// enforces that before a value can reach the encoder.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            TokenValue::Byte(v) => out.put_u8(*v),
            TokenValue::UShort(v) => out.put_u16_le(*v),
            TokenValue::ULong(v) => out.put_u32_le(*v),
            TokenValue::Long(v) => out.put_i32_le(*v),
            TokenValue::ULongLong(v) => out.put_u64_le(*v),
            TokenValue::LongLong(v) => out.put_i64_le(*v),
            TokenValue::Guid(v) => guid::encode(v, out),
            TokenValue::SmallString(s) | TokenValue::String(s) | TokenValue::ULongString(s) => {
                put_length_prefixed(self.token_type(), s.as_bytes(), out)
            }
            TokenValue::SmallBytes(b) | TokenValue::Bytes(b) | TokenValue::ULongBytes(b) => {
                put_length_prefixed(self.token_type(), b, out)
            }
            TokenValue::Float(v) => out.put_f32_le(*v),
            TokenValue::Double(v) => out.put_f64_le(*v),
        }
    }

    /// Reads a payload of the given type from the front of `buf`.
    pub fn decode(token_type: TokenType, buf: &mut Bytes) -> Result<Self, ProtocolError> {
        if let Some(size) = token_type.fixed_size() {
            ensure_remaining("token payload", size, buf.remaining())?;
        }

        let value = match token_type {
            TokenType::Byte => TokenValue::Byte(buf.get_u8()),
            TokenType::UShort => TokenValue::UShort(buf.get_u16_le()),
            TokenType::ULong => TokenValue::ULong(buf.get_u32_le()),
            TokenType::Long => TokenValue::Long(buf.get_i32_le()),
            TokenType::ULongLong => TokenValue::ULongLong(buf.get_u64_le()),
            TokenType::LongLong => TokenValue::LongLong(buf.get_i64_le()),
            TokenType::Guid => TokenValue::Guid(guid::decode(buf)?),
            TokenType::Float => TokenValue::Float(buf.get_f32_le()),
            TokenType::Double => TokenValue::Double(buf.get_f64_le()),
            TokenType::SmallString | TokenType::String | TokenType::ULongString => {
                let data = take_length_prefixed(token_type, buf)?;
                let text = String::from_utf8(data.to_vec())
                    .map_err(|_| ProtocolError::InvalidUtf8(type_name(token_type)))?;
                // Unreachable fallback: the match arm only admits string types.
                Self::string(token_type, text)
                    .ok_or(ProtocolError::UnknownTokenType(token_type.id()))?
            }
            TokenType::SmallBytes => TokenValue::SmallBytes(take_length_prefixed(token_type, buf)?),
            TokenType::Bytes => TokenValue::Bytes(take_length_prefixed(token_type, buf)?),
            TokenType::ULongBytes => TokenValue::ULongBytes(take_length_prefixed(token_type, buf)?),
        };
        Ok(value)
    }
}

impl fmt::Display for TokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenValue::Byte(v) => write!(f, "{}", v),
            TokenValue::UShort(v) => write!(f, "{}", v),
            TokenValue::ULong(v) => write!(f, "{}", v),
            TokenValue::Long(v) => write!(f, "{}", v),
            TokenValue::ULongLong(v) => write!(f, "{}", v),
            TokenValue::LongLong(v) => write!(f, "{}", v),
            TokenValue::Guid(v) => write!(f, "{}", v),
            TokenValue::SmallString(s) | TokenValue::String(s) | TokenValue::ULongString(s) => {
                f.write_str(s)
            }
            TokenValue::SmallBytes(b) | TokenValue::Bytes(b) | TokenValue::ULongBytes(b) => {
                f.write_str(&String::from_utf8_lossy(b))
            }
            // Debug keeps the fractional part, so 1.0 prints as "1.0".
            TokenValue::Float(v) => write!(f, "{:?}", v),
            TokenValue::Double(v) => write!(f, "{:?}", v),
        }
    }
}

fn type_name(token_type: TokenType) -> &'static str {
    match token_type {
        TokenType::SmallString => "SmallString",
        TokenType::String => "String",
        TokenType::ULongString => "ULongString",
        _ => "bytes",
    }
}

fn put_length_prefixed(token_type: TokenType, data: &[u8], out: &mut BytesMut) {
    match token_type.length_prefix_size() {
        Some(1) => out.put_u8(data.len() as u8),
        Some(2) => out.put_u16_le(data.len() as u16),
        _ => out.put_u32_le(data.len() as u32),
    }
    out.put_slice(data);
}

fn take_length_prefixed(token_type: TokenType, buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let prefix = token_type.length_prefix_size().unwrap_or(4);
    ensure_remaining("token length prefix", prefix, buf.remaining())?;
    let len = match prefix {
        1 => buf.get_u8() as usize,
        2 => buf.get_u16_le() as usize,
        _ => buf.get_u32_le() as usize,
    };
    ensure_remaining("token value", len, buf.remaining())?;
    Ok(buf.split_to(len))
}

/// One slot of a token stream, bound to a header descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    header: HeaderDescriptor,
    value: Option<TokenValue>,
}

impl Token {
    pub fn new(header: HeaderDescriptor) -> Self {
        Self {
            header,
            value: None,
        }
    }

    pub fn header(&self) -> &HeaderDescriptor {
        &self.header
    }

    pub fn id(&self) -> u16 {
        self.header.id
    }

    pub fn value(&self) -> Option<&TokenValue> {
        self.value.as_ref()
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_required(&self) -> bool {
        self.header.required
    }

    /// Assigns a value. The value type must match the descriptor and
    /// variable-width values must fit the type's length prefix.
    pub fn set(&mut self, value: TokenValue) -> Result<(), ProtocolError> {
        let actual = value.token_type();
        if actual != self.header.token_type {
            return Err(ProtocolError::TokenTypeMismatch {
                header: self.header.name,
                expected: self.header.token_type,
                actual,
            });
        }
        if let Some(len) = value.variable_len() {
            let max = actual.max_value_len();
            if len > max {
                return Err(ProtocolError::ValueTooLong {
                    header: self.header.name,
                    len,
                    max,
                });
            }
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.value = None;
    }

    /// Bytes written by `encode`: zero when absent.
    pub fn compute_length(&self) -> usize {
        match &self.value {
            Some(value) => TOKEN_HEADER_SIZE + value.encoded_len(),
            None => 0,
        }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        if let Some(value) = &self.value {
            out.put_u16_le(self.header.id);
            out.put_u8(self.header.token_type.id());
            value.encode(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(token_type: TokenType) -> HeaderDescriptor {
        HeaderDescriptor::new(0x0001, "Test", token_type, false)
    }

    fn sample_values() -> Vec<TokenValue> {
        vec![
            TokenValue::Byte(0xAB),
            TokenValue::UShort(0xBEEF),
            TokenValue::ULong(120),
            TokenValue::Long(-25),
            TokenValue::ULongLong(u64::MAX - 1),
            TokenValue::LongLong(i64::MIN + 7),
            TokenValue::Guid(Uuid::new_v4()),
            TokenValue::SmallString("RntbdMockServer".to_string()),
            TokenValue::String("dbs/db/colls/coll/docs/doc".to_string()),
            TokenValue::ULongString("x".repeat(300)),
            TokenValue::SmallBytes(Bytes::from_static(b"\x01\x02")),
            TokenValue::Bytes(Bytes::from_static(b"resource-id")),
            TokenValue::ULongBytes(Bytes::from(vec![7u8; 70_000])),
            TokenValue::Float(1.5),
            TokenValue::Double(1.0),
        ]
    }

    #[test]
    fn test_token_type_ids() {
        for id in 0x00..=0x0E {
            assert_eq!(TokenType::from_id(id).unwrap().id(), id);
        }
        assert!(matches!(
            TokenType::from_id(0xFF),
            Err(ProtocolError::UnknownTokenType(0xFF))
        ));
    }

    #[test]
    fn test_every_type_roundtrips() {
        for value in sample_values() {
            let mut token = Token::new(descriptor(value.token_type()));
            token.set(value.clone()).unwrap();

            let mut out = BytesMut::new();
            token.encode(&mut out);
            assert_eq!(out.len(), token.compute_length());

            let mut buf = out.freeze();
            assert_eq!(buf.get_u16_le(), 0x0001);
            let token_type = TokenType::from_id(buf.get_u8()).unwrap();
            let decoded = TokenValue::decode(token_type, &mut buf).unwrap();
            assert_eq!(decoded, value);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_absent_token_writes_nothing() {
        let token = Token::new(descriptor(TokenType::ULong));
        let mut out = BytesMut::new();
        token.encode(&mut out);
        assert!(out.is_empty());
        assert_eq!(token.compute_length(), 0);
        assert!(!token.is_present());
    }

    #[test]
    fn test_set_rejects_type_mismatch() {
        let mut token = Token::new(descriptor(TokenType::ULong));
        let err = token.set(TokenValue::Byte(1)).unwrap_err();
        assert!(matches!(err, ProtocolError::TokenTypeMismatch { .. }));
        assert!(!token.is_present());
    }

    #[test]
    fn test_set_rejects_oversized_small_string() {
        let mut token = Token::new(descriptor(TokenType::SmallString));
        let err = token
            .set(TokenValue::SmallString("a".repeat(256)))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ValueTooLong { max: 255, .. }));
    }

    #[test]
    fn test_decode_truncated_string() {
        // String with declared length 10 but only 3 bytes of data.
        let mut buf = Bytes::from_static(&[0x0A, 0x00, b'a', b'b', b'c']);
        let err = TokenValue::decode(TokenType::String, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 10, .. }));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let mut buf = Bytes::from_static(&[0x02, 0xFF, 0xFE]);
        let err = TokenValue::decode(TokenType::SmallString, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8(_)));
    }

    #[test]
    fn test_parse_and_display() {
        let charge = TokenValue::parse(TokenType::Double, "1.0").unwrap();
        assert_eq!(charge, TokenValue::Double(1.0));
        assert_eq!(charge.to_string(), "1.0");

        let id = TokenValue::parse(TokenType::ULong, "7").unwrap();
        assert_eq!(id.as_u32(), Some(7));
        assert_eq!(id.to_string(), "7");

        assert!(TokenValue::parse(TokenType::ULong, "seven").is_none());
        assert_eq!(
            TokenValue::parse(TokenType::String, "token").unwrap().as_str(),
            Some("token")
        );
    }
}
