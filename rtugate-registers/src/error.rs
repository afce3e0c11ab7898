//! Register resolution errors.

use thiserror::Error;

/// Errors from encoding or decoding register spans.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("register span is empty")]
    EmptySpan,

    #[error("parameter count mismatch: expected {expected} values, got {actual}")]
    ParameterCountMismatch { expected: usize, actual: usize },

    #[error("register '{name}' does not support writing")]
    UnsupportedWrite { name: String },

    #[error("register '{name}' does not support reading")]
    UnsupportedRead { name: String },

    #[error("payload shorter than span: expected at least {expected} bytes, got {actual}")]
    ShortPayload { expected: usize, actual: usize },

    #[error("register '{name}' window {start}..{end} exceeds payload of {len} bytes")]
    WindowOutOfBounds {
        name: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("register '{name}' encoded {actual} bytes, expected {expected}")]
    EncodedLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid value for register '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("unknown register: {0}")]
    UnknownRegister(String),

    #[error("duplicate register name in catalog: {0}")]
    DuplicateRegister(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] rtugate_protocol::ProtocolError),

    #[error("catalog error: {0}")]
    Catalog(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
