//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding bytes or framing RTU messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("short frame: {len} bytes (min {min})", min = crate::MIN_FRAME_SIZE)]
    ShortFrame { len: usize },

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("insufficient bytes: need {needed}, have {available}")]
    InsufficientBytes { needed: usize, available: usize },

    #[error("byte count overflow: {0} bytes does not fit a one-byte count field")]
    ByteCountOverflow(usize),
}

impl ProtocolError {
    /// Returns whether the bytes were damaged in transit, so that asking the
    /// device again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::ShortFrame { .. } | ProtocolError::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::ShortFrame { len: 3 };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('5'));

        // CRC uses hex format
        let err = ProtocolError::ChecksumMismatch {
            expected: 0xABCD,
            actual: 0x1234,
        };
        let msg = err.to_string();
        assert!(msg.contains("abcd"));
        assert!(msg.contains("1234"));

        let err = ProtocolError::InsufficientBytes {
            needed: 8,
            available: 6,
        };
        assert!(err.to_string().contains("need 8"));

        let err = ProtocolError::ByteCountOverflow(300);
        assert!(err.to_string().contains("300"));
    }

    #[test]
    fn test_retryable() {
        assert!(ProtocolError::ShortFrame { len: 0 }.is_retryable());
        assert!(ProtocolError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_retryable());
        assert!(!ProtocolError::ByteCountOverflow(256).is_retryable());
    }
}
