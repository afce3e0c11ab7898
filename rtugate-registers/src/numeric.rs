//! Typed numeric registers.

use crate::error::RegisterError;
use crate::register::{Decode, Encode, Register, ValueMap};
use rtugate_protocol::codec::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value type stored in the register words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl ValueKind {
    /// Number of 16-bit words the value occupies.
    pub fn word_count(&self) -> u16 {
        match self {
            ValueKind::U16 | ValueKind::I16 => 1,
            ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => 2,
        }
    }

    fn is_integer(&self) -> bool {
        !matches!(self, ValueKind::F32)
    }

    fn range(&self) -> (i64, i64) {
        match self {
            ValueKind::U16 => (0, u16::MAX as i64),
            ValueKind::I16 => (i16::MIN as i64, i16::MAX as i64),
            ValueKind::U32 => (0, u32::MAX as i64),
            ValueKind::I32 => (i32::MIN as i64, i32::MAX as i64),
            ValueKind::F32 => (i64::MIN, i64::MAX),
        }
    }
}

/// Byte order of the value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// Which capabilities the register exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn is_readable(&self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// A register holding a single number.
///
/// With a scale factor the decoded value is `raw * scale` and written values
/// are divided by `scale` (rounded for integer kinds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRegister {
    pub name: String,
    pub start: u16,
    #[serde(default)]
    pub kind: ValueKind,
    #[serde(default)]
    pub endian: Endian,
    #[serde(default)]
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

/// Raw value read from or written to the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Raw {
    Int(i64),
    Float(f32),
}

impl NumericRegister {
    /// Creates a read-only big-endian register.
    pub fn new(name: impl Into<String>, start: u16, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            start,
            kind,
            endian: Endian::default(),
            access: Access::default(),
            scale: None,
        }
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    fn invalid(&self, reason: impl Into<String>) -> RegisterError {
        RegisterError::InvalidValue {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn read_raw<O: ByteOrder>(&self, window: &[u8]) -> Result<Raw, RegisterError> {
        let mut cursor = window;
        let raw = match self.kind {
            ValueKind::U16 => Raw::Int(O::decode_u16s(&mut cursor, 1)?[0] as i64),
            ValueKind::I16 => Raw::Int(O::decode_u16s(&mut cursor, 1)?[0] as i16 as i64),
            ValueKind::U32 => Raw::Int(O::decode_u32s(&mut cursor, 1)?[0] as i64),
            ValueKind::I32 => Raw::Int(O::decode_u32s(&mut cursor, 1)?[0] as i32 as i64),
            ValueKind::F32 => Raw::Float(O::decode_f32s(&mut cursor, 1)?[0]),
        };
        Ok(raw)
    }

    fn write_raw<O: ByteOrder>(&self, raw: Raw) -> Vec<u8> {
        let mut out = Vec::with_capacity(4);
        match (self.kind, raw) {
            (ValueKind::U16 | ValueKind::I16, Raw::Int(v)) => O::encode_u16(&mut out, v as u16),
            (ValueKind::U32 | ValueKind::I32, Raw::Int(v)) => O::encode_u32(&mut out, v as u32),
            (_, Raw::Float(v)) => O::encode_f32(&mut out, v),
            (ValueKind::F32, Raw::Int(v)) => O::encode_f32(&mut out, v as f32),
        }
        out
    }

    /// Parses text into a raw value for this register's kind.
    fn parse(&self, text: &str) -> Result<Raw, RegisterError> {
        let text = text.trim();

        if !self.kind.is_integer() {
            let value: f64 = text
                .parse()
                .map_err(|_| self.invalid(format!("'{}' is not a number", text)))?;
            let value = value / self.scale.unwrap_or(1.0);
            let value = value as f32;
            if !value.is_finite() {
                return Err(self.invalid(format!("'{}' is out of range", text)));
            }
            return Ok(Raw::Float(value));
        }

        let value = match self.scale {
            Some(scale) => {
                let value: f64 = text
                    .parse()
                    .map_err(|_| self.invalid(format!("'{}' is not a number", text)))?;
                let scaled = (value / scale).round();
                if !scaled.is_finite() {
                    return Err(self.invalid(format!("'{}' is out of range", text)));
                }
                scaled as i64
            }
            None => text
                .parse::<i64>()
                .map_err(|_| self.invalid(format!("'{}' is not an integer", text)))?,
        };

        let (min, max) = self.kind.range();
        if value < min || value > max {
            return Err(self.invalid(format!(
                "{} is outside {:?} range {}..={}",
                value, self.kind, min, max
            )));
        }
        Ok(Raw::Int(value))
    }
}

impl Register for NumericRegister {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> u16 {
        self.start
    }

    fn word_count(&self) -> u16 {
        self.kind.word_count()
    }

    fn as_decoder(&self) -> Option<&dyn Decode> {
        if self.access.is_readable() {
            Some(self)
        } else {
            None
        }
    }

    fn as_encoder(&self) -> Option<&dyn Encode> {
        if self.access.is_writable() {
            Some(self)
        } else {
            None
        }
    }
}

impl Decode for NumericRegister {
    fn decode(&self, window: &[u8], values: &mut ValueMap) -> Result<(), RegisterError> {
        let raw = match self.endian {
            Endian::Big => self.read_raw::<BigEndian>(window)?,
            Endian::Little => self.read_raw::<LittleEndian>(window)?,
        };

        let value = match (raw, self.scale) {
            (Raw::Int(v), None) => Value::from(v),
            (Raw::Int(v), Some(scale)) => Value::from(v as f64 * scale),
            (Raw::Float(v), None) => Value::from(v as f64),
            (Raw::Float(v), Some(scale)) => Value::from(v as f64 * scale),
        };
        values.insert(self.name.clone(), value);
        Ok(())
    }
}

impl Encode for NumericRegister {
    fn encode(&self, value: &str) -> Result<Vec<u8>, RegisterError> {
        let raw = self.parse(value)?;
        let bytes = match self.endian {
            Endian::Big => self.write_raw::<BigEndian>(raw),
            Endian::Little => self.write_raw::<LittleEndian>(raw),
        };
        Ok(bytes)
    }
}
