//! Krati Core - Strongly-typed identifiers, limits, and value codecs.
//!
//! This crate provides the foundation types shared by the Krati storage
//! engine: sequence numbers, batch and retention identifiers, named writer
//! sources, explicit resource limits, and the value-codec contract that
//! stores and retentions consume.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Strongly-typed IDs**: Prevent mixing up an `Scn` with a `BatchId`
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod codec;
mod types;

pub use codec::{BytesSerializer, CodecError, CodecResult, Serializer, Utf8Serializer};
pub use types::{BatchId, RetentionId, Scn, SourceId};

/// Resource limits for Krati.
pub mod limits {
    /// Maximum size of an event key in bytes (64 KiB).
    pub const EVENT_KEY_SIZE_BYTES_MAX: u32 = 64 * 1024;

    /// Maximum size of an event value in bytes (1 MiB).
    pub const EVENT_VALUE_SIZE_BYTES_MAX: u32 = 1024 * 1024;

    /// Maximum number of events in a single batch.
    pub const BATCH_EVENTS_COUNT_MAX: u32 = 1_000_000;

    /// Maximum number of sources contributing to one clock.
    pub const CLOCK_SOURCES_COUNT_MAX: u32 = 1024;

    /// Maximum size of a retention segment file in bytes (1 GiB).
    pub const SEGMENT_SIZE_BYTES_MAX: u64 = 1024 * 1024 * 1024;

    /// Minimum size of a retention segment file in bytes (1 MiB).
    pub const SEGMENT_SIZE_BYTES_MIN: u64 = 1024 * 1024;
}
