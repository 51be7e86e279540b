//! Retention error types.
//!
//! Predictable outcomes (`ClockRegression`, `RetentionExhausted`) are
//! first-class variants, never panics: a stale writer and a lagging reader
//! are both expected states of a healthy system.

use krati_clock::ClockError;
use krati_core::{CodecError, Scn, SourceId};
use krati_store::StoreError;
use thiserror::Error;

/// Result type for retention operations.
pub type RetentionResult<T> = Result<T, RetentionError>;

/// Errors that can occur during retention operations.
#[derive(Debug, Error)]
pub enum RetentionError {
    /// A write carried an scn behind the source's watermark, or an event
    /// clock regressed within a batch.
    #[error("clock regression on {source_id}: requested {requested} < current {current}")]
    ClockRegression {
        /// The writer source.
        source_id: SourceId,
        /// The current watermark (or batch max) for the source.
        current: Scn,
        /// The stale scn that was rejected.
        requested: Scn,
    },

    /// The batch cannot accept more events.
    #[error("batch full: {reason}")]
    BatchFull {
        /// Why the batch is full.
        reason: &'static str,
    },

    /// The requested clock predates evicted history; the consumer must
    /// resync from a snapshot.
    #[error("retention exhausted for {source_id}: requested {requested} below floor {floor}")]
    RetentionExhausted {
        /// The reader source.
        source_id: SourceId,
        /// The scn the reader asked to replay from.
        requested: Scn,
        /// The oldest scn still retained.
        floor: Scn,
    },

    /// An event offset is outside a sealed batch.
    #[error("event offset {offset} out of range (batch holds {count} events)")]
    OffsetOutOfRange {
        /// Requested offset.
        offset: u32,
        /// Number of events in the batch.
        count: u32,
    },

    /// Encoded position bytes are not a valid position.
    #[error("invalid position encoding: {reason}")]
    InvalidPosition {
        /// Why the encoding is invalid.
        reason: &'static str,
    },

    /// A persisted segment is not a valid batch.
    #[error("invalid segment: {reason}")]
    InvalidSegment {
        /// Why the segment is invalid.
        reason: &'static str,
    },

    /// CRC checksum mismatch indicates segment corruption.
    #[error("segment checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected CRC32 value.
        expected: u32,
        /// Actual CRC32 value computed.
        actual: u32,
    },

    /// The retention configuration is invalid.
    #[error("invalid retention config: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: &'static str,
    },

    /// A fatal inconsistency between retention, store, and clock.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// What went irrecoverably wrong.
        message: &'static str,
    },

    /// Error from the clock layer.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// Error from the key-value store or file storage.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Error from a value codec.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
