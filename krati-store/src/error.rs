//! Store error types.
//!
//! All errors are explicit and typed. No string errors.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// CRC checksum mismatch indicates corruption.
    #[error("checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Byte offset where corruption was detected.
        offset: u64,
        /// Expected CRC32 value.
        expected: u32,
        /// Actual CRC32 value computed.
        actual: u32,
    },

    /// A persisted record header is invalid.
    #[error("invalid record at offset {offset}: {reason}")]
    InvalidRecord {
        /// Byte offset of the record.
        offset: u64,
        /// Why the record is invalid.
        reason: &'static str,
    },

    /// A key or value exceeds its size limit.
    #[error("{what} too large: {size} bytes exceeds max {max} bytes")]
    EntryTooLarge {
        /// What exceeded the limit ("key" or "value").
        what: &'static str,
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The store was closed and can no longer serve operations.
    #[error("store is closed")]
    Closed,

    /// I/O error from underlying storage.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },
}

impl StoreError {
    /// Creates an I/O error.
    pub fn io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }

    /// Returns true if this error indicates data corruption.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::InvalidRecord { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::ChecksumMismatch {
            offset: 64,
            expected: 0xDEAD_BEEF,
            actual: 0xCAFE_BABE,
        };
        let msg = format!("{err}");
        assert!(msg.contains("64"));
        assert!(msg.contains("0xdeadbeef"));
    }

    #[test]
    fn test_is_corruption() {
        assert!(StoreError::InvalidRecord {
            offset: 0,
            reason: "test"
        }
        .is_corruption());
        assert!(!StoreError::Closed.is_corruption());
    }
}
