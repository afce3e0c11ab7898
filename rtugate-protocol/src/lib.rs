//! # rtugate-protocol
//!
//! Modbus RTU wire protocol for rtugate.
//!
//! This crate provides:
//! - Big/little-endian conversions and cursor decoders for packed register data
//! - CRC-16/MODBUS checksums
//! - RTU frames with checksum validation and request builders
//! - Function codes and exception codes

pub mod checksum;
pub mod codec;
pub mod error;
pub mod frame;
pub mod function;

pub use checksum::{crc16, crc16_chain};
pub use codec::{BigEndian, ByteOrder, LittleEndian};
pub use error::ProtocolError;
pub use frame::{Framer, RtuFrame};
pub use function::Exception;

/// Shortest packet accepted by [`RtuFrame::parse`].
pub const MIN_FRAME_SIZE: usize = 5;

/// Size of the trailing CRC in bytes.
pub const CRC_SIZE: usize = 2;

/// Largest byte count that fits the one-byte count field of write requests.
pub const MAX_BYTE_COUNT: usize = u8::MAX as usize;
