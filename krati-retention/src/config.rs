//! Retention configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use krati_clock::ClockError;
use krati_core::limits::{
    BATCH_EVENTS_COUNT_MAX, CLOCK_SOURCES_COUNT_MAX, SEGMENT_SIZE_BYTES_MAX,
    SEGMENT_SIZE_BYTES_MIN,
};
use krati_core::{RetentionId, SourceId};

use crate::error::{RetentionError, RetentionResult};
use crate::policy::{RetentionPolicy, RetentionPolicyOnSize};

/// The fixed source order of one retention's clocks.
///
/// Every event clock in a retention has one coordinate per source in this
/// order. Writers and readers of the retention must agree on it; it is
/// process-wide configuration.
#[derive(Debug)]
pub struct SourceOrder {
    /// Sources in coordinate order.
    sources: Vec<SourceId>,
    /// Source name to coordinate index.
    index: HashMap<SourceId, usize>,
}

impl SourceOrder {
    /// Creates a source order.
    ///
    /// # Panics
    /// Panics if the list is empty, contains duplicates, or exceeds the
    /// source count limit.
    #[must_use]
    pub fn new(sources: Vec<SourceId>) -> Self {
        assert!(!sources.is_empty(), "at least one source is required");
        assert!(
            sources.len() <= CLOCK_SOURCES_COUNT_MAX as usize,
            "too many sources"
        );

        let mut index = HashMap::with_capacity(sources.len());
        for (position, source) in sources.iter().enumerate() {
            let previous = index.insert(source.clone(), position);
            assert!(previous.is_none(), "duplicate source in order");
        }

        Self { sources, index }
    }

    /// Returns the sources in coordinate order.
    #[must_use]
    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    /// Returns the clock dimension.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Bounded by CLOCK_SOURCES_COUNT_MAX.
    pub fn dimension(&self) -> u32 {
        self.sources.len() as u32
    }

    /// Returns the coordinate index of a source.
    ///
    /// # Errors
    /// Returns `UnknownSource` if the source is not in the order.
    pub fn index_of(&self, source: &SourceId) -> RetentionResult<usize> {
        self.index
            .get(source)
            .copied()
            .ok_or_else(|| {
                RetentionError::Clock(ClockError::UnknownSource {
                    source_id: source.clone(),
                })
            })
    }

    /// Returns true if the source is in the order.
    #[must_use]
    pub fn contains(&self, source: &SourceId) -> bool {
        self.index.contains_key(source)
    }
}

/// Configuration for one retention.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Retention identifier; also names the on-disk directory.
    pub id: RetentionId,
    /// Directory under which the retention keeps its segments.
    pub home_dir: PathBuf,
    /// Writer sources contributing events, in clock coordinate order.
    pub sources: Vec<SourceId>,
    /// Maximum events per batch.
    pub batch_size: u32,
    /// Eviction policy for sealed batches.
    pub policy: Arc<dyn RetentionPolicy>,
    /// Maximum segment file size in MiB.
    pub segment_file_size_mb: u32,
}

impl RetentionConfig {
    /// Creates a configuration with defaults: batch size 10 000, sixteen
    /// retained batches, 32 MiB segments.
    #[must_use]
    pub fn new(id: RetentionId, home_dir: impl Into<PathBuf>, sources: Vec<SourceId>) -> Self {
        Self {
            id,
            home_dir: home_dir.into(),
            sources,
            batch_size: 10_000,
            policy: Arc::new(RetentionPolicyOnSize::new(16)),
            segment_file_size_mb: 32,
        }
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the eviction policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn RetentionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the maximum segment file size in MiB.
    #[must_use]
    pub const fn with_segment_file_size_mb(mut self, size_mb: u32) -> Self {
        self.segment_file_size_mb = size_mb;
        self
    }

    /// Returns the maximum segment file size in bytes.
    #[must_use]
    pub const fn segment_size_bytes(&self) -> u64 {
        self.segment_file_size_mb as u64 * 1024 * 1024
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if any field is out of range.
    pub fn validate(&self) -> RetentionResult<()> {
        if self.sources.is_empty() {
            return Err(RetentionError::InvalidConfig {
                reason: "at least one source is required",
            });
        }
        if self.sources.len() > CLOCK_SOURCES_COUNT_MAX as usize {
            return Err(RetentionError::InvalidConfig {
                reason: "too many sources",
            });
        }
        if self.batch_size == 0 {
            return Err(RetentionError::InvalidConfig {
                reason: "batch size must be positive",
            });
        }
        if self.batch_size > BATCH_EVENTS_COUNT_MAX {
            return Err(RetentionError::InvalidConfig {
                reason: "batch size exceeds limit",
            });
        }
        if self.segment_size_bytes() < SEGMENT_SIZE_BYTES_MIN {
            return Err(RetentionError::InvalidConfig {
                reason: "segment file size below minimum",
            });
        }
        if self.segment_size_bytes() > SEGMENT_SIZE_BYTES_MAX {
            return Err(RetentionError::InvalidConfig {
                reason: "segment file size above maximum",
            });
        }
        Ok(())
    }
}
