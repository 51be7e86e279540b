//! Retention policies.
//!
//! A policy decides how many of the oldest sealed batches to drop after a
//! seal. Size-based retention is built in; age- or byte-based policies
//! plug in behind the same trait.

use std::fmt;

use krati_core::BatchId;

/// Summary of one sealed batch, enough for eviction decisions.
#[derive(Debug, Clone, Copy)]
pub struct BatchSummary {
    /// Batch identifier.
    pub id: BatchId,
    /// Number of events in the batch.
    pub events: u32,
    /// Creation timestamp in epoch milliseconds.
    pub created_at: i64,
}

/// Decides which sealed history to keep.
pub trait RetentionPolicy: Send + Sync + fmt::Debug {
    /// Returns how many of the oldest sealed batches to evict.
    ///
    /// `sealed` is ordered oldest first. Returning 0 keeps everything.
    fn num_to_evict(&self, sealed: &[BatchSummary]) -> u32;
}

/// Keeps at most a fixed number of sealed batches.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicyOnSize {
    /// Maximum number of sealed batches to retain.
    max_batches: u32,
}

impl RetentionPolicyOnSize {
    /// Creates a policy retaining at most `max_batches` sealed batches.
    ///
    /// # Panics
    /// Panics if `max_batches` is zero: a retention that keeps no sealed
    /// history cannot serve indexed replay at all.
    #[must_use]
    pub const fn new(max_batches: u32) -> Self {
        assert!(max_batches > 0, "must retain at least one sealed batch");
        Self { max_batches }
    }

    /// Returns the configured bound.
    #[must_use]
    pub const fn max_batches(&self) -> u32 {
        self.max_batches
    }
}

impl RetentionPolicy for RetentionPolicyOnSize {
    #[allow(clippy::cast_possible_truncation)] // Sealed count bounded by the policy itself.
    fn num_to_evict(&self, sealed: &[BatchSummary]) -> u32 {
        (sealed.len() as u32).saturating_sub(self.max_batches)
    }
}
