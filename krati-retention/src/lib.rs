//! Krati Retention - Bounded change history with multi-source replay.
//!
//! A retention is an append-only, segmented, bounded-history stream of
//! change events tagged with a logical clock. Writers couple each
//! key-value put to a retention append and a watermark advance; readers
//! catch up from an arbitrary clock, transitioning seamlessly from
//! indexed replay of sealed history to streaming tail reads. A composite
//! reader fans in several retentions behind one cursor while preserving
//! per-source order.
//!
//! # Example
//!
//! ```ignore
//! use krati_retention::{
//!     CompositeRetentionStoreReader, RetentionConfig, RetentionPolicyOnSize,
//!     RetentionStoreReader, SimpleRetention, SimpleRetentionStoreReader,
//!     SimpleRetentionStoreWriter,
//! };
//!
//! let retention = Arc::new(SimpleRetention::open(TokioStorage::new(), config).await?);
//! let writer = SimpleRetentionStoreWriter::new(source, retention.clone(), store.clone(), clock)?;
//!
//! writer.put(key, value, scn).await?;
//!
//! let reader = SimpleRetentionStoreReader::new(source, retention, store)?;
//! let mut position = reader.position_at(&Clock::ZERO).await?;
//! let mut events = Vec::new();
//! position = reader.read(&position, &mut events).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod batch;
mod composite;
mod config;
mod error;
mod event;
mod policy;
mod position;
mod reader;
mod retention;
mod writer;

pub use batch::{EventBatch, BATCH_FIXED_HEADER_SIZE};
pub use composite::CompositeRetentionStoreReader;
pub use config::{RetentionConfig, SourceOrder};
pub use error::{RetentionError, RetentionResult};
pub use event::Event;
pub use policy::{BatchSummary, RetentionPolicy, RetentionPolicyOnSize};
pub use position::{CompositePosition, Position};
pub use reader::{RetentionStoreReader, SimpleRetentionStoreReader};
pub use retention::SimpleRetention;
pub use writer::SimpleRetentionStoreWriter;
