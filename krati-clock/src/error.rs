//! Clock error types.
//!
//! All errors are explicit and typed. No string errors.

use krati_core::SourceId;
use thiserror::Error;

/// Result type for clock operations.
pub type ClockResult<T> = Result<T, ClockError>;

/// Errors that can occur during clock and watermark operations.
#[derive(Debug, Error)]
pub enum ClockError {
    /// The source is not in the declared source list.
    #[error("unknown source: {source_id}")]
    UnknownSource {
        /// The source that was not declared.
        source_id: SourceId,
    },

    /// Two clocks with different dimensions were compared.
    #[error("clock dimension mismatch: {left} vs {right}")]
    DimensionMismatch {
        /// Dimension of the left-hand clock.
        left: u32,
        /// Dimension of the right-hand clock.
        right: u32,
    },

    /// Encoded clock bytes have the wrong length for the source order.
    #[error("invalid clock encoding: {length} bytes for {source_count} sources")]
    InvalidEncoding {
        /// Length of the encoded bytes.
        length: usize,
        /// Number of sources in the agreed order.
        source_count: u32,
    },

    /// The watermark file contains an unparseable line.
    #[error("corrupt watermark file at line {line}: {reason}")]
    CorruptWaterMarks {
        /// 1-based line number.
        line: u32,
        /// Why the line is invalid.
        reason: &'static str,
    },

    /// I/O error from watermark persistence.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },
}

impl ClockError {
    /// Creates an I/O error.
    pub fn io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClockError::UnknownSource {
            source_id: SourceId::new("ghost"),
        };
        assert_eq!(format!("{err}"), "unknown source: ghost");

        let err = ClockError::DimensionMismatch { left: 2, right: 3 };
        assert_eq!(format!("{err}"), "clock dimension mismatch: 2 vs 3");
    }
}
