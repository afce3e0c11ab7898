//! CRC-16/MODBUS.

use crc::{Crc, CRC_16_MODBUS};

/// Polynomial 0x8005 reflected (0xA001), init 0xFFFF, no final xor.
static CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Computes the CRC-16/MODBUS checksum of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Computes the checksum over several slices as if they were contiguous.
pub fn crc16_chain<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u16 {
    let mut digest = CRC_MODBUS.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}
