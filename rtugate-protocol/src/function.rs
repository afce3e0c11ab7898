//! Function codes and exception codes.

use std::fmt;

pub const READ_COILS: u8 = 0x01;
pub const READ_DISCRETE_INPUTS: u8 = 0x02;
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
pub const READ_INPUT_REGISTERS: u8 = 0x04;
pub const WRITE_SINGLE_COIL: u8 = 0x05;
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Bit set in the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus exception codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exception {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    /// Vendor-specific or unassigned code.
    Other(u8),
}

impl Exception {
    /// Returns the wire code.
    pub fn code(&self) -> u8 {
        match self {
            Exception::IllegalFunction => 0x01,
            Exception::IllegalDataAddress => 0x02,
            Exception::IllegalDataValue => 0x03,
            Exception::ServerDeviceFailure => 0x04,
            Exception::Acknowledge => 0x05,
            Exception::ServerDeviceBusy => 0x06,
            Exception::MemoryParityError => 0x08,
            Exception::GatewayPathUnavailable => 0x0A,
            Exception::GatewayTargetFailedToRespond => 0x0B,
            Exception::Other(code) => *code,
        }
    }
}

impl From<u8> for Exception {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Exception::IllegalFunction,
            0x02 => Exception::IllegalDataAddress,
            0x03 => Exception::IllegalDataValue,
            0x04 => Exception::ServerDeviceFailure,
            0x05 => Exception::Acknowledge,
            0x06 => Exception::ServerDeviceBusy,
            0x08 => Exception::MemoryParityError,
            0x0A => Exception::GatewayPathUnavailable,
            0x0B => Exception::GatewayTargetFailedToRespond,
            other => Exception::Other(other),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::IllegalFunction => write!(f, "illegal function"),
            Exception::IllegalDataAddress => write!(f, "illegal data address"),
            Exception::IllegalDataValue => write!(f, "illegal data value"),
            Exception::ServerDeviceFailure => write!(f, "server device failure"),
            Exception::Acknowledge => write!(f, "acknowledge"),
            Exception::ServerDeviceBusy => write!(f, "server device busy"),
            Exception::MemoryParityError => write!(f, "memory parity error"),
            Exception::GatewayPathUnavailable => write!(f, "gateway path unavailable"),
            Exception::GatewayTargetFailedToRespond => {
                write!(f, "gateway target device failed to respond")
            }
            Exception::Other(code) => write!(f, "exception {:#04x}", code),
        }
    }
}
