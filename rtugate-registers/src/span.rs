//! Register spans.
//!
//! A span groups the registers taking part in one request. Its address range
//! runs from the lowest start address to the end of the register with the
//! highest start, so gaps between members are covered:
//!
//! ```text
//! registers {start=10,count=2} {start=15,count=1}
//!
//! word  10  11  12  13  14  15
//!      [ a   a ] .   .   .  [b]     span start = 10, word count = 6
//! ```
//!
//! Members keep their declared order; address order is recomputed for each
//! encode or decode.

use crate::error::RegisterError;
use crate::register::{Register, ValueMap};
use std::fmt;
use std::sync::Arc;

/// How payload offsets are computed during decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Payload starts at the span start address.
    Relative,
    /// Payload starts at address 0. Used by devices whose unsolicited reports
    /// cover a wider address block than the span.
    Absolute,
}

/// An ordered, non-empty set of registers.
#[derive(Clone)]
pub struct RegisterSpan {
    registers: Vec<Arc<dyn Register>>,
}

impl RegisterSpan {
    pub fn new(registers: Vec<Arc<dyn Register>>) -> Result<Self, RegisterError> {
        if registers.is_empty() {
            return Err(RegisterError::EmptySpan);
        }
        Ok(Self { registers })
    }

    /// Returns the members in declared order.
    pub fn registers(&self) -> &[Arc<dyn Register>] {
        &self.registers
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Lowest member start address.
    pub fn start(&self) -> u16 {
        self.registers.iter().map(|r| r.start()).min().unwrap_or(0)
    }

    /// Words from the span start to the end of the member with the highest
    /// start address.
    pub fn word_count(&self) -> usize {
        let Some(last) = self.last() else {
            return 0;
        };
        last.start() as usize + last.word_count() as usize - self.start() as usize
    }

    /// Size of the span in bytes.
    pub fn byte_len(&self) -> usize {
        self.word_count() * 2
    }

    /// The member with the highest start address (the first one on ties).
    fn last(&self) -> Option<&Arc<dyn Register>> {
        self.registers
            .iter()
            .reduce(|last, r| if r.start() > last.start() { r } else { last })
    }

    /// Picks the addressing mode for a payload of `len` bytes.
    pub fn decode_mode(&self, len: usize) -> Result<DecodeMode, RegisterError> {
        let expected = self.byte_len();
        match len.cmp(&expected) {
            std::cmp::Ordering::Equal => Ok(DecodeMode::Relative),
            std::cmp::Ordering::Greater => Ok(DecodeMode::Absolute),
            std::cmp::Ordering::Less => Err(RegisterError::ShortPayload {
                expected,
                actual: len,
            }),
        }
    }

    /// Encodes comma-separated values, one per member in declared order.
    ///
    /// The output covers the whole span and is laid out by address, so the
    /// declaration order of members does not matter. Gaps are zero-filled.
    pub fn encode(&self, csv: &str) -> Result<Vec<u8>, RegisterError> {
        let values: Vec<&str> = csv.split(',').collect();
        if values.len() != self.registers.len() {
            return Err(RegisterError::ParameterCountMismatch {
                expected: self.registers.len(),
                actual: values.len(),
            });
        }

        let span_start = self.start() as usize;
        let mut buf = vec![0u8; self.byte_len()];

        for (register, value) in self.registers.iter().zip(values) {
            let encoder = register
                .as_encoder()
                .ok_or_else(|| RegisterError::UnsupportedWrite {
                    name: register.name().to_string(),
                })?;
            let bytes = encoder.encode(value)?;

            let expected = register.word_count() as usize * 2;
            if bytes.len() != expected {
                return Err(RegisterError::EncodedLength {
                    name: register.name().to_string(),
                    expected,
                    actual: bytes.len(),
                });
            }

            let start = (register.start() as usize - span_start) * 2;
            let end = start + expected;
            if end > buf.len() {
                return Err(RegisterError::WindowOutOfBounds {
                    name: register.name().to_string(),
                    start,
                    end,
                    len: buf.len(),
                });
            }
            buf[start..end].copy_from_slice(&bytes);
        }

        Ok(buf)
    }

    /// Decodes `data` into `values`, one entry per member.
    ///
    /// Members are processed in declared order and written to `values` as
    /// they succeed. On error, entries written before the failing member are
    /// left in place: only trust `values` when this returns `Ok`.
    pub fn decode(&self, data: &[u8], values: &mut ValueMap) -> Result<(), RegisterError> {
        let mode = self.decode_mode(data.len())?;
        let span_start = self.start() as usize;
        tracing::trace!(
            "decoding {} registers from {} bytes ({:?})",
            self.registers.len(),
            data.len(),
            mode
        );

        for register in &self.registers {
            let decoder = register
                .as_decoder()
                .ok_or_else(|| RegisterError::UnsupportedRead {
                    name: register.name().to_string(),
                })?;

            let start = match mode {
                DecodeMode::Relative => (register.start() as usize - span_start) * 2,
                DecodeMode::Absolute => register.start() as usize * 2,
            };
            let end = start + register.word_count() as usize * 2;
            if end > data.len() {
                return Err(RegisterError::WindowOutOfBounds {
                    name: register.name().to_string(),
                    start,
                    end,
                    len: data.len(),
                });
            }

            decoder.decode(&data[start..end], values)?;
        }

        Ok(())
    }
}

impl fmt::Debug for RegisterSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterSpan")
            .field(
                "registers",
                &self.registers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("start", &self.start())
            .field("word_count", &self.word_count())
            .finish()
    }
}
