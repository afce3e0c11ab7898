//! RTU frame format.
//!
//! Frame layout:
//!
//! ```text
//! +---------+----------+-----------------+------------------+
//! | address | function | payload         | crc16 (LE)       |
//! | 1 byte  | 1 byte   | N bytes         | 2 bytes          |
//! +---------+----------+-----------------+------------------+
//! ```
//!
//! The CRC covers address, function and payload. It is never stored: it is
//! checked when a packet is parsed and recomputed whenever a frame is encoded,
//! so a frame can never carry a stale checksum.

use crate::checksum::{crc16, crc16_chain};
use crate::codec::{BigEndian, ByteOrder};
use crate::error::ProtocolError;
use crate::function::{Exception, EXCEPTION_FLAG};
use crate::{CRC_SIZE, MAX_BYTE_COUNT, MIN_FRAME_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

/// Common interface of Modbus framings.
///
/// The request builders only touch the payload; address, function and
/// checksum stay with the framing.
pub trait Framer {
    /// Function code, including the exception flag if set.
    fn function(&self) -> u8;

    /// Payload bytes.
    fn data(&self) -> &[u8];

    /// Replaces the payload.
    fn set_data(&mut self, data: Bytes);

    /// Marks the frame as an exception response. The payload is replaced by
    /// the exception code; this cannot be undone.
    fn set_exception(&mut self, exception: Exception);

    /// Serializes the frame for the wire.
    fn encode(&self) -> BytesMut;

    /// Returns the exception carried by the frame, if any.
    fn exception(&self) -> Option<Exception> {
        if self.function() & EXCEPTION_FLAG == 0 {
            return None;
        }
        self.data().first().map(|&code| Exception::from(code))
    }

    /// Returns the register address at the start of the payload.
    fn register(&self) -> Option<u16> {
        match self.data() {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Read request: start address and number of registers (or coils).
    fn set_read_request(&mut self, start: u16, count: u16) {
        let mut data = BytesMut::with_capacity(4);
        data.put_u16(start);
        data.put_u16(count);
        self.set_data(data.freeze());
    }

    /// Write request carrying 16-bit register values.
    fn set_write_registers(
        &mut self,
        start: u16,
        count: u16,
        values: &[u16],
    ) -> Result<(), ProtocolError> {
        let byte_count = values.len() * 2;
        if byte_count > MAX_BYTE_COUNT {
            return Err(ProtocolError::ByteCountOverflow(byte_count));
        }
        let mut data = BytesMut::with_capacity(5 + byte_count);
        data.put_u16(start);
        data.put_u16(count);
        data.put_u8(byte_count as u8);
        for &value in values {
            BigEndian::encode_u16(&mut data, value);
        }
        self.set_data(data.freeze());
        Ok(())
    }

    /// Write request carrying raw bytes, e.g. packed coil states.
    fn set_write_bytes(
        &mut self,
        start: u16,
        count: u16,
        bytes: &[u8],
    ) -> Result<(), ProtocolError> {
        if bytes.len() > MAX_BYTE_COUNT {
            return Err(ProtocolError::ByteCountOverflow(bytes.len()));
        }
        let mut data = BytesMut::with_capacity(5 + bytes.len());
        data.put_u16(start);
        data.put_u16(count);
        data.put_u8(bytes.len() as u8);
        data.put_slice(bytes);
        self.set_data(data.freeze());
        Ok(())
    }

    /// Single-register control write (remote control commands).
    fn set_control(&mut self, start: u16, value: u16) {
        let mut data = BytesMut::with_capacity(4);
        data.put_u16(start);
        data.put_u16(value);
        self.set_data(data.freeze());
    }
}

/// A Modbus RTU frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    /// Device (slave) address.
    pub address: u8,
    /// Function code.
    pub function: u8,
    /// Payload between function code and CRC.
    pub data: Bytes,
}

impl RtuFrame {
    /// Creates a frame with an empty payload.
    pub fn new(address: u8, function: u8) -> Self {
        Self {
            address,
            function,
            data: Bytes::new(),
        }
    }

    /// Parses and validates a received packet.
    pub fn parse(packet: &[u8]) -> Result<Self, ProtocolError> {
        if packet.len() < MIN_FRAME_SIZE {
            return Err(ProtocolError::ShortFrame { len: packet.len() });
        }

        let (body, tail) = packet.split_at(packet.len() - CRC_SIZE);
        let expected = u16::from_le_bytes([tail[0], tail[1]]);
        let actual = crc16(body);
        if expected != actual {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        Ok(Self {
            address: body[0],
            function: body[1],
            data: Bytes::copy_from_slice(&body[2..]),
        })
    }

    /// Returns the checksum of the current contents.
    pub fn checksum(&self) -> u16 {
        crc16_chain([&[self.address, self.function][..], &self.data[..]])
    }

    /// Returns the encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        2 + self.data.len() + CRC_SIZE
    }

    /// Returns whether the exception flag is set.
    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }
}

impl Framer for RtuFrame {
    fn function(&self) -> u8 {
        self.function
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn set_data(&mut self, data: Bytes) {
        self.data = data;
    }

    fn set_exception(&mut self, exception: Exception) {
        self.function |= EXCEPTION_FLAG;
        self.data = Bytes::copy_from_slice(&[exception.code()]);
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.address);
        buf.put_u8(self.function);
        buf.put_slice(&self.data);
        let crc = crc16(&buf);
        buf.put_u16_le(crc);
        buf
    }
}

impl TryFrom<&[u8]> for RtuFrame {
    type Error = ProtocolError;

    fn try_from(packet: &[u8]) -> Result<Self, Self::Error> {
        Self::parse(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{READ_HOLDING_REGISTERS, WRITE_MULTIPLE_COILS, WRITE_MULTIPLE_REGISTERS};
    use proptest::prelude::*;

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let mut packet = body.to_vec();
        packet.extend_from_slice(&crc16(body).to_le_bytes());
        packet
    }

    #[test]
    fn test_parse_literal_vector() {
        let packet = with_crc(&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x02]);
        let frame = RtuFrame::parse(&packet).unwrap();

        assert_eq!(frame.address, 1);
        assert_eq!(frame.function, 3);
        assert_eq!(&frame.data[..], &[0x00, 0x0A, 0x00, 0x02]);
        assert_eq!(frame.register(), Some(10));
        assert_eq!(frame.exception(), None);
    }

    #[test]
    fn test_encode_known_request() {
        let mut frame = RtuFrame::new(0x01, READ_HOLDING_REGISTERS);
        frame.set_read_request(0x0000, 0x0001);
        assert_eq!(
            &frame.encode()[..],
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]
        );
        assert_eq!(frame.checksum(), 0x0A84);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let mut frame = RtuFrame::new(7, READ_HOLDING_REGISTERS);
        frame.set_read_request(100, 4);
        assert_eq!(frame.encode(), frame.encode());
        assert_eq!(frame.encode().len(), frame.encoded_len());
    }

    #[test]
    fn test_short_frame() {
        let result = RtuFrame::parse(&[0x01, 0x03, 0xFF, 0xFF]);
        assert_eq!(result, Err(ProtocolError::ShortFrame { len: 4 }));

        let result = RtuFrame::parse(&[]);
        assert_eq!(result, Err(ProtocolError::ShortFrame { len: 0 }));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut packet = with_crc(&[0x01, 0x03, 0x00, 0x0A, 0x00, 0x02]);
        let len = packet.len();
        packet[len - 1] ^= 0xFF;

        let result = RtuFrame::parse(&packet);
        assert!(matches!(
            result,
            Err(ProtocolError::ChecksumMismatch { expected, actual }) if expected != actual
        ));
    }

    #[test]
    fn test_minimum_frame() {
        let packet = with_crc(&[0x11, 0x83, 0x02]);
        let frame = RtuFrame::parse(&packet).unwrap();
        assert!(frame.is_exception());
        assert_eq!(frame.exception(), Some(Exception::IllegalDataAddress));
    }

    #[test]
    fn test_set_exception() {
        let mut frame = RtuFrame::new(0x11, READ_HOLDING_REGISTERS);
        frame.set_read_request(1, 2);
        frame.set_exception(Exception::IllegalDataValue);

        assert_eq!(frame.function, 0x83);
        assert_eq!(&frame.data[..], &[0x03]);
        assert_eq!(frame.exception(), Some(Exception::IllegalDataValue));

        // Setting another exception keeps the flag and replaces the code
        frame.set_exception(Exception::ServerDeviceBusy);
        assert_eq!(frame.function, 0x83);
        assert_eq!(frame.exception(), Some(Exception::ServerDeviceBusy));

        let decoded = RtuFrame::parse(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_write_registers_payload() {
        let mut frame = RtuFrame::new(1, WRITE_MULTIPLE_REGISTERS);
        let values = [0x000A, 0x0102];
        frame.set_write_registers(0x0010, 2, &values).unwrap();
        assert_eq!(
            &frame.data[..],
            &[0x00, 0x10, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_write_bytes_payload() {
        let mut frame = RtuFrame::new(1, WRITE_MULTIPLE_COILS);
        frame.set_write_bytes(0x0013, 10, &[0xCD, 0x01]).unwrap();
        assert_eq!(&frame.data[..], &[0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]);
    }

    #[test]
    fn test_write_byte_count_overflow() {
        let mut frame = RtuFrame::new(1, WRITE_MULTIPLE_REGISTERS);
        let values = vec![0u16; 128];
        assert_eq!(
            frame.set_write_registers(0, 128, &values),
            Err(ProtocolError::ByteCountOverflow(256))
        );
        assert!(frame.data.is_empty());

        let bytes = vec![0u8; 256];
        assert!(frame.set_write_bytes(0, 2048, &bytes).is_err());
    }

    #[test]
    fn test_control_payload() {
        let mut frame = RtuFrame::new(1, crate::function::WRITE_SINGLE_REGISTER);
        frame.set_control(0x0001, 0xFF00);
        assert_eq!(&frame.data[..], &[0x00, 0x01, 0xFF, 0x00]);
    }

    #[test]
    fn test_register_short_payload() {
        let mut frame = RtuFrame::new(1, 3);
        frame.set_data(Bytes::from_static(&[0x01]));
        assert_eq!(frame.register(), None);
    }

    #[test]
    fn test_copy_is_independent() {
        let mut original = RtuFrame::new(1, READ_HOLDING_REGISTERS);
        original.set_read_request(1, 1);
        let copy = original.clone();
        original.set_exception(Exception::Acknowledge);

        assert_eq!(copy.function, READ_HOLDING_REGISTERS);
        assert_eq!(&copy.data[..], &[0x00, 0x01, 0x00, 0x01]);
    }

    proptest! {
        #[test]
        fn prop_parse_encode_roundtrip(
            address in any::<u8>(),
            function in any::<u8>(),
            data in proptest::collection::vec(any::<u8>(), 1..64),
        ) {
            let mut frame = RtuFrame::new(address, function);
            frame.set_data(Bytes::from(data));
            let decoded = RtuFrame::parse(&frame.encode()).unwrap();
            prop_assert_eq!(decoded, frame);
        }

        #[test]
        fn prop_single_byte_corruption_detected(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut frame = RtuFrame::new(1, READ_HOLDING_REGISTERS);
            frame.set_data(Bytes::from(data));
            let mut packet = frame.encode();

            // Corrupt one byte of the payload
            let i = 2 + index.index(frame.data.len());
            packet[i] ^= flip;

            let result = RtuFrame::parse(&packet);
            let is_mismatch = matches!(result, Err(ProtocolError::ChecksumMismatch { .. }));
            prop_assert!(is_mismatch);
        }
    }
}
