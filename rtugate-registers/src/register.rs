//! Register abstraction.
//!
//! A register is a named block of 16-bit words at a fixed address. Whether it
//! can be read into a value or written from text is optional: implementors
//! opt in by returning themselves from [`Register::as_decoder`] and
//! [`Register::as_encoder`].

use crate::error::RegisterError;
use serde_json::Value;
use std::collections::HashMap;

/// Decoded values keyed by register name.
pub type ValueMap = HashMap<String, Value>;

/// A named register block.
pub trait Register: Send + Sync {
    fn name(&self) -> &str;

    /// Starting word address.
    fn start(&self) -> u16;

    /// Number of 16-bit words.
    fn word_count(&self) -> u16;

    /// Returns the decode capability, if the register is readable.
    fn as_decoder(&self) -> Option<&dyn Decode> {
        None
    }

    /// Returns the encode capability, if the register is writable.
    fn as_encoder(&self) -> Option<&dyn Encode> {
        None
    }
}

/// Decodes the register's bytes into one or more named values.
pub trait Decode {
    /// `window` holds exactly `word_count * 2` bytes.
    fn decode(&self, window: &[u8], values: &mut ValueMap) -> Result<(), RegisterError>;
}

/// Encodes a text value into the register's bytes.
pub trait Encode {
    /// Must return exactly `word_count * 2` bytes.
    fn encode(&self, value: &str) -> Result<Vec<u8>, RegisterError>;
}
