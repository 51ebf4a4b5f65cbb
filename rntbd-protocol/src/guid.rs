//! GUID wire layout.
//!
//! Activity ids and `Guid` tokens use the mixed-endian layout of the .NET
//! `Guid` type: the first three groups (4, 2 and 2 bytes) are little-endian,
//! the trailing 8 bytes are written as-is.

use crate::error::{ensure_remaining, ProtocolError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Encoded size of a GUID.
pub const GUID_SIZE: usize = 16;

pub fn encode(id: &Uuid, out: &mut BytesMut) {
    out.put_slice(&id.to_bytes_le());
}

pub fn decode(buf: &mut Bytes) -> Result<Uuid, ProtocolError> {
    ensure_remaining("guid", GUID_SIZE, buf.remaining())?;
    let mut raw = [0u8; GUID_SIZE];
    buf.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes_le(raw))
}
