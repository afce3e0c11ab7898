//! Byte-order conversions for register data.
//!
//! Devices pack differently typed values back to back with no delimiter, so
//! besides bulk conversions each byte order offers cursor decoders that
//! consume a fixed number of values from the front of a `&[u8]` and advance
//! it:
//!
//! ```
//! use rtugate_protocol::codec::{BigEndian, ByteOrder};
//!
//! let packet = [0x00, 0x2A, 0x41, 0x20, 0x00, 0x00];
//! let mut cursor = &packet[..];
//! let ids = BigEndian::decode_u16s(&mut cursor, 1).unwrap();
//! let temps = BigEndian::decode_f32s(&mut cursor, 1).unwrap();
//! assert_eq!(ids, vec![42]);
//! assert_eq!(temps, vec![10.0]);
//! assert!(cursor.is_empty());
//! ```

use crate::error::ProtocolError;
use bytes::BufMut;

/// Big-endian (network order) conversions. Modbus register order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BigEndian;

/// Little-endian conversions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LittleEndian;

/// Integer and float conversions for one byte order.
///
/// Implementors only supply the four fixed-width primitives; everything else
/// is derived from them.
pub trait ByteOrder {
    fn read_u16(bytes: [u8; 2]) -> u16;
    fn read_u32(bytes: [u8; 4]) -> u32;
    fn write_u16(value: u16) -> [u8; 2];
    fn write_u32(value: u32) -> [u8; 4];

    /// Converts bytes to 16-bit values. A trailing odd byte is ignored.
    fn bytes_to_u16s(bytes: &[u8]) -> Vec<u16> {
        bytes
            .chunks_exact(2)
            .map(|c| Self::read_u16([c[0], c[1]]))
            .collect()
    }

    fn u16s_to_bytes(values: &[u16]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * 2);
        for &value in values {
            Self::encode_u16(&mut out, value);
        }
        out
    }

    /// Converts bytes to 32-bit values. Trailing bytes short of a full value
    /// are ignored.
    fn bytes_to_u32s(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|c| Self::read_u32([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn u32s_to_bytes(values: &[u32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * 4);
        for &value in values {
            Self::encode_u32(&mut out, value);
        }
        out
    }

    /// Reads one IEEE-754 single from the first four bytes.
    fn bytes_to_f32(bytes: &[u8]) -> Result<f32, ProtocolError> {
        match bytes {
            [a, b, c, d, ..] => Ok(f32::from_bits(Self::read_u32([*a, *b, *c, *d]))),
            _ => Err(ProtocolError::InsufficientBytes {
                needed: 4,
                available: bytes.len(),
            }),
        }
    }

    fn f32_to_bytes(value: f32) -> [u8; 4] {
        Self::write_u32(value.to_bits())
    }

    fn bytes_to_f32s(bytes: &[u8]) -> Vec<f32> {
        Self::bytes_to_u32s(bytes)
            .into_iter()
            .map(f32::from_bits)
            .collect()
    }

    fn f32s_to_bytes(values: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * 4);
        for &value in values {
            Self::encode_f32(&mut out, value);
        }
        out
    }

    /// Appends one 16-bit value to `buf`.
    fn encode_u16(buf: &mut impl BufMut, value: u16) {
        buf.put_slice(&Self::write_u16(value));
    }

    /// Appends one 32-bit value to `buf`.
    fn encode_u32(buf: &mut impl BufMut, value: u32) {
        buf.put_slice(&Self::write_u32(value));
    }

    /// Appends one single-precision float to `buf`.
    fn encode_f32(buf: &mut impl BufMut, value: f32) {
        buf.put_slice(&Self::f32_to_bytes(value));
    }

    /// Consumes `count` 16-bit values from the front of `cursor`.
    ///
    /// On error nothing is consumed.
    fn decode_u16s(cursor: &mut &[u8], count: usize) -> Result<Vec<u16>, ProtocolError> {
        take_words(cursor, count, 2).map(Self::bytes_to_u16s)
    }

    /// Consumes `count` 32-bit values from the front of `cursor`.
    fn decode_u32s(cursor: &mut &[u8], count: usize) -> Result<Vec<u32>, ProtocolError> {
        take_words(cursor, count, 4).map(Self::bytes_to_u32s)
    }

    /// Consumes `count` floats from the front of `cursor`.
    fn decode_f32s(cursor: &mut &[u8], count: usize) -> Result<Vec<f32>, ProtocolError> {
        take_words(cursor, count, 4).map(Self::bytes_to_f32s)
    }
}

impl ByteOrder for BigEndian {
    fn read_u16(bytes: [u8; 2]) -> u16 {
        u16::from_be_bytes(bytes)
    }

    fn read_u32(bytes: [u8; 4]) -> u32 {
        u32::from_be_bytes(bytes)
    }

    fn write_u16(value: u16) -> [u8; 2] {
        value.to_be_bytes()
    }

    fn write_u32(value: u32) -> [u8; 4] {
        value.to_be_bytes()
    }
}

impl ByteOrder for LittleEndian {
    fn read_u16(bytes: [u8; 2]) -> u16 {
        u16::from_le_bytes(bytes)
    }

    fn read_u32(bytes: [u8; 4]) -> u32 {
        u32::from_le_bytes(bytes)
    }

    fn write_u16(value: u16) -> [u8; 2] {
        value.to_le_bytes()
    }

    fn write_u32(value: u32) -> [u8; 4] {
        value.to_le_bytes()
    }
}

/// Splits `count` values of `width` bytes off the front of `cursor`.
fn take_words<'a>(
    cursor: &mut &'a [u8],
    count: usize,
    width: usize,
) -> Result<&'a [u8], ProtocolError> {
    let len = count
        .checked_mul(width)
        .ok_or(ProtocolError::InsufficientBytes {
            needed: usize::MAX,
            available: cursor.len(),
        })?;
    take(cursor, len)
}

/// Splits `len` bytes off the front of `cursor`.
fn take<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8], ProtocolError> {
    if cursor.len() < len {
        return Err(ProtocolError::InsufficientBytes {
            needed: len,
            available: cursor.len(),
        });
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}
