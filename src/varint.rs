// SPDX-License-Identifier: MIT
//! Variable-width integer encoding used by every container and header
//!
//! ```text
//! unsigned   0xxxxxxx                                   0 ..= 127
//!            10xxxxxx xxxxxxxx                          ..= 16383
//!            11xxxxxx xxxxxxxx xxxxxxxx xxxxxxxx        ..= 2^30 - 1
//!
//! signed     0sxxxxxx                                   |v| ..= 63
//!            10sxxxxx xxxxxxxx                          |v| ..= 8191
//!            11sxxxxx xxxxxxxx xxxxxxxx xxxxxxxx        |v| ..= 2^29 - 1
//! ```
//!
//! Multi-byte values are big-endian. Signed values use sign and magnitude, so
//! a "negative zero" is representable; the tree tokens and label deltas use
//! the sign bit as a flag.

use crate::reader::ReadError;

/// Largest value [`put_u32`] can encode
pub const MAX_UNSIGNED: u32 = (1 << 30) - 1;

/// Largest magnitude [`put_signed`] can encode
pub const MAX_MAGNITUDE: u32 = (1 << 29) - 1;

/// Append an unsigned value
#[inline]
pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    debug_assert!(value <= MAX_UNSIGNED, "varint overflow: {}", value);
    if value < 128 {
        out.push(value as u8);
    } else if value < 16384 {
        out.extend_from_slice(&[0x80 | (value >> 8) as u8, value as u8]);
    } else {
        out.extend_from_slice(&[
            0xC0 | ((value >> 24) & 0x3F) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ]);
    }
}

/// Append a sign-and-magnitude value
#[inline]
pub fn put_signed(out: &mut Vec<u8>, negative: bool, magnitude: u32) {
    debug_assert!(magnitude <= MAX_MAGNITUDE, "varint overflow: {}", magnitude);
    if magnitude < 64 {
        out.push(if negative { 0x40 } else { 0 } | magnitude as u8);
    } else if magnitude < 8192 {
        let sign = if negative { 0x20 } else { 0 };
        out.extend_from_slice(&[0x80 | sign | (magnitude >> 8) as u8, magnitude as u8]);
    } else {
        let sign = if negative { 0x20 } else { 0 };
        out.extend_from_slice(&[
            0xC0 | sign | ((magnitude >> 24) & 0x1F) as u8,
            (magnitude >> 16) as u8,
            (magnitude >> 8) as u8,
            magnitude as u8,
        ]);
    }
}

/// Append a `u32` length followed by the bytes themselves
#[inline]
pub fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

/// Encoded width of an unsigned value
pub fn unsigned_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16383 => 2,
        _ => 4,
    }
}

#[inline]
fn byte_at(buf: &[u8], pos: usize) -> Result<u8, ReadError> {
    buf.get(pos).copied().ok_or(ReadError::Truncated("integer"))
}

/// Decode an unsigned value at `*pos`, advancing the cursor
pub fn decode_u32(buf: &[u8], pos: &mut usize) -> Result<u32, ReadError> {
    let first = byte_at(buf, *pos)?;
    let value = if first & 0x80 == 0 {
        *pos += 1;
        first as u32
    } else if first & 0x40 == 0 {
        let second = byte_at(buf, *pos + 1)?;
        *pos += 2;
        ((first as u32 & 0x3F) << 8) | second as u32
    } else {
        let rest = buf
            .get(*pos + 1..*pos + 4)
            .ok_or(ReadError::Truncated("integer"))?;
        *pos += 4;
        ((first as u32 & 0x3F) << 24)
            | ((rest[0] as u32) << 16)
            | ((rest[1] as u32) << 8)
            | rest[2] as u32
    };
    Ok(value)
}

/// Decode a sign-and-magnitude value at `*pos`, advancing the cursor
pub fn decode_signed(buf: &[u8], pos: &mut usize) -> Result<(bool, u32), ReadError> {
    let first = byte_at(buf, *pos)?;
    if first & 0x80 == 0 {
        *pos += 1;
        return Ok((first & 0x40 != 0, first as u32 & 0x3F));
    }
    let negative = first & 0x20 != 0;
    let magnitude = if first & 0x40 == 0 {
        let second = byte_at(buf, *pos + 1)?;
        *pos += 2;
        ((first as u32 & 0x1F) << 8) | second as u32
    } else {
        let rest = buf
            .get(*pos + 1..*pos + 4)
            .ok_or(ReadError::Truncated("integer"))?;
        *pos += 4;
        ((first as u32 & 0x1F) << 24)
            | ((rest[0] as u32) << 16)
            | ((rest[1] as u32) << 8)
            | rest[2] as u32
    };
    Ok((negative, magnitude))
}

/// Take `len` raw bytes at `*pos`, advancing the cursor
pub fn decode_raw<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], ReadError> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or(ReadError::Truncated("byte string"))?;
    let bytes = &buf[*pos..end];
    *pos = end;
    Ok(bytes)
}

/// Cursor over a borrowed byte slice
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn u32(&mut self) -> Result<u32, ReadError> {
        decode_u32(self.buf, &mut self.pos)
    }

    #[inline]
    pub fn signed(&mut self) -> Result<(bool, u32), ReadError> {
        decode_signed(self.buf, &mut self.pos)
    }

    #[inline]
    pub fn raw(&mut self, len: usize) -> Result<&'a [u8], ReadError> {
        decode_raw(self.buf, &mut self.pos, len)
    }

    /// Length-prefixed byte string written by [`put_bytes`]
    pub fn bytes(&mut self) -> Result<&'a [u8], ReadError> {
        let len = self.u32()? as usize;
        self.raw(len)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}
