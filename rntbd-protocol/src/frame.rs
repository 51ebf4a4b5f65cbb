//! Frame delimiting and the fixed frame prefixes.
//!
//! Request frame layout (all integers little-endian):
//!
//! ```text
//! +--------+---------------+----------------+-------------+--------------+
//! | length | resource_type | operation_type | activity_id | token stream |
//! | 4 bytes| 2 bytes       | 2 bytes        | 16 bytes    | length - 24  |
//! +--------+---------------+----------------+-------------+--------------+
//! ```
//!
//! Response frames replace the two type codes with a 4-byte status code.
//! `length` counts itself. A message whose `PayloadPresent` token is set is
//! followed by a payload block: a 4-byte length (not counting itself) and
//! the payload bytes.

use crate::error::{ensure_remaining, ProtocolError};
use crate::guid::{self, GUID_SIZE};
use crate::resource::{OperationType, ResourceType};
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Size of the frame length field.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Size of the fixed prefix shared by request and response frames (4+2+2+16 = 24).
pub const FRAME_PREFIX_SIZE: usize = LENGTH_FIELD_SIZE + 4 + GUID_SIZE;

/// Size of the payload block length field.
pub const PAYLOAD_LENGTH_SIZE: usize = 4;

/// Splits length-prefixed frames off a growing byte buffer.
///
/// Frames are returned with their length field intact; the frame prefix
/// decoders re-read it.
#[derive(Debug, Clone, Copy)]
pub struct FrameDelimiter {
    max_frame_size: u32,
}

impl FrameDelimiter {
    pub fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Removes the next complete frame from `buf`.
    ///
    /// Returns `Ok(None)` if more data is needed. A declared length below
    /// the fixed prefix or above the maximum is an error; nothing is
    /// consumed in that case and the connection must be dropped.
    pub fn next_frame(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if buf.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if length < FRAME_PREFIX_SIZE as u32 {
            return Err(ProtocolError::FrameTooSmall {
                size: length,
                min: FRAME_PREFIX_SIZE as u32,
            });
        }
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let length = length as usize;
        if buf.len() < length {
            buf.reserve(length - buf.len());
            return Ok(None);
        }

        Ok(Some(buf.split_to(length).freeze()))
    }

    /// Removes the next payload block from `buf`, returning the payload
    /// without its length field.
    pub fn next_payload(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if buf.len() < PAYLOAD_LENGTH_SIZE {
            return Ok(None);
        }

        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let total = PAYLOAD_LENGTH_SIZE + length as usize;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(PAYLOAD_LENGTH_SIZE);
        Ok(Some(buf.split_to(length as usize).freeze()))
    }
}

impl Default for FrameDelimiter {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

/// Writes a payload block.
pub fn encode_payload(payload: &[u8], out: &mut BytesMut) -> Result<(), ProtocolError> {
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(ProtocolError::FrameTooLarge {
            size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
            max: MAX_FRAME_SIZE,
        });
    }
    out.reserve(PAYLOAD_LENGTH_SIZE + payload.len());
    out.put_u32_le(payload.len() as u32);
    out.put_slice(payload);
    Ok(())
}

/// Converts a total frame size to its length field.
fn frame_length(total: usize) -> Result<u32, ProtocolError> {
    match u32::try_from(total) {
        Ok(length) if length <= MAX_FRAME_SIZE => Ok(length),
        _ => Err(ProtocolError::FrameTooLarge {
            size: u32::try_from(total).unwrap_or(u32::MAX),
            max: MAX_FRAME_SIZE,
        }),
    }
}

/// Fixed prefix of a request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    /// Total frame length including this prefix.
    pub length: u32,
    pub resource_type: ResourceType,
    pub operation_type: OperationType,
    pub activity_id: Uuid,
}

impl RequestFrame {
    /// Builds a prefix for a frame whose token stream is `token_length` bytes.
    pub fn new(
        resource_type: ResourceType,
        operation_type: OperationType,
        activity_id: Uuid,
        token_length: usize,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            length: frame_length(FRAME_PREFIX_SIZE + token_length)?,
            resource_type,
            operation_type,
            activity_id,
        })
    }

    /// Bytes of token stream that follow the prefix.
    pub fn token_length(&self) -> usize {
        (self.length as usize).saturating_sub(FRAME_PREFIX_SIZE)
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(FRAME_PREFIX_SIZE);
        out.put_u32_le(self.length);
        out.put_u16_le(self.resource_type.code());
        out.put_u16_le(self.operation_type.code());
        guid::encode(&self.activity_id, out);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure_remaining("request frame prefix", FRAME_PREFIX_SIZE, buf.remaining())?;
        let length = buf.get_u32_le();
        let resource_type = ResourceType(buf.get_u16_le());
        let operation_type = OperationType(buf.get_u16_le());
        let activity_id = guid::decode(buf)?;
        Ok(Self {
            length,
            resource_type,
            operation_type,
            activity_id,
        })
    }
}

/// Fixed prefix of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseStatus {
    /// Total frame length including this prefix, excluding any payload block.
    pub length: u32,
    pub status_code: u32,
    pub activity_id: Uuid,
}

impl ResponseStatus {
    pub fn new(status_code: u32, activity_id: Uuid, token_length: usize) -> Result<Self, ProtocolError> {
        Ok(Self {
            length: frame_length(FRAME_PREFIX_SIZE + token_length)?,
            status_code,
            activity_id,
        })
    }

    pub fn token_length(&self) -> usize {
        (self.length as usize).saturating_sub(FRAME_PREFIX_SIZE)
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(FRAME_PREFIX_SIZE);
        out.put_u32_le(self.length);
        out.put_u32_le(self.status_code);
        guid::encode(&self.activity_id, out);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        ensure_remaining("response status", FRAME_PREFIX_SIZE, buf.remaining())?;
        let length = buf.get_u32_le();
        let status_code = buf.get_u32_le();
        let activity_id = guid::decode(buf)?;
        Ok(Self {
            length,
            status_code,
            activity_id,
        })
    }
}

/// Checks that a delimited frame is exactly as long as its prefix declares.
pub(crate) fn check_frame_length(declared: u32, frame: &Bytes) -> Result<(), ProtocolError> {
    if declared as usize != frame.len() {
        return Err(ProtocolError::LengthMismatch {
            expected: declared as usize,
            observed: frame.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame_bytes(token_len: usize, fill: u8) -> Vec<u8> {
        let prefix = RequestFrame::new(
            ResourceType::DOCUMENT,
            OperationType::READ,
            Uuid::new_v4(),
            token_len,
        )
        .unwrap();
        let mut out = BytesMut::new();
        prefix.encode(&mut out);
        out.put_bytes(fill, token_len);
        out.to_vec()
    }

    #[test]
    fn test_request_prefix_roundtrip() {
        let activity_id = Uuid::new_v4();
        let prefix =
            RequestFrame::new(ResourceType(3), OperationType(3), activity_id, 10).unwrap();
        assert_eq!(prefix.length, 34);

        let mut out = BytesMut::new();
        prefix.encode(&mut out);
        assert_eq!(out.len(), FRAME_PREFIX_SIZE);
        assert_eq!(&out[..8], &[34, 0, 0, 0, 3, 0, 3, 0]);

        let decoded = RequestFrame::decode(&mut out.freeze()).unwrap();
        assert_eq!(decoded, prefix);
        assert_eq!(decoded.token_length(), 10);
    }

    #[test]
    fn test_response_status_roundtrip() {
        let status = ResponseStatus::new(200, Uuid::new_v4(), 0).unwrap();
        let mut out = BytesMut::new();
        status.encode(&mut out);
        assert_eq!(&out[..8], &[24, 0, 0, 0, 200, 0, 0, 0]);
        assert_eq!(ResponseStatus::decode(&mut out.freeze()).unwrap(), status);
    }

    #[test]
    fn test_delimiter_keeps_length_field() {
        let bytes = frame_bytes(6, 0xAA);
        let mut buf = BytesMut::from(&bytes[..]);
        let frame = FrameDelimiter::default().next_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &bytes[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_delimiter_partial() {
        let bytes = frame_bytes(6, 0xAA);
        let delimiter = FrameDelimiter::default();

        let mut buf = BytesMut::from(&bytes[..2]);
        assert!(delimiter.next_frame(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[2..20]);
        assert!(delimiter.next_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 20);
        buf.extend_from_slice(&bytes[20..]);
        assert!(delimiter.next_frame(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_delimiter_rejects_oversize() {
        let delimiter = FrameDelimiter::new(64);
        let mut buf = BytesMut::new();
        buf.put_u32_le(65);
        let err = delimiter.next_frame(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { size: 65, max: 64 }));
        assert!(err.is_framing());
    }

    #[test]
    fn test_delimiter_rejects_undersize() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(8);
        let err = FrameDelimiter::default().next_frame(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooSmall { size: 8, .. }));
    }

    #[test]
    fn test_payload_block() {
        let mut out = BytesMut::new();
        encode_payload(b"hello", &mut out).unwrap();
        assert_eq!(&out[..4], &[5, 0, 0, 0]);

        let delimiter = FrameDelimiter::default();
        let mut partial = BytesMut::from(&out[..6]);
        assert!(delimiter.next_payload(&mut partial).unwrap().is_none());

        let payload = delimiter.next_payload(&mut out).unwrap().unwrap();
        assert_eq!(&payload[..], b"hello");
        assert!(out.is_empty());
    }

    #[test]
    fn test_check_frame_length() {
        let frame = Bytes::from(frame_bytes(4, 0));
        assert!(check_frame_length(28, &frame).is_ok());
        assert!(matches!(
            check_frame_length(30, &frame),
            Err(ProtocolError::LengthMismatch {
                expected: 30,
                observed: 28
            })
        ));
    }

    proptest! {
        #[test]
        fn prop_split_stream_yields_same_frames(
            sizes in proptest::collection::vec(0usize..200, 1..8),
            chunk in 1usize..64,
        ) {
            let frames: Vec<Vec<u8>> = sizes
                .iter()
                .enumerate()
                .map(|(i, len)| frame_bytes(*len, i as u8))
                .collect();
            let stream: Vec<u8> = frames.concat();
            let delimiter = FrameDelimiter::default();

            let mut buf = BytesMut::new();
            let mut seen = Vec::new();
            for piece in stream.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(frame) = delimiter.next_frame(&mut buf).unwrap() {
                    seen.push(frame.to_vec());
                }
            }

            prop_assert!(buf.is_empty());
            prop_assert_eq!(seen, frames);
        }
    }
}
