//! The retention store writer.
//!
//! A writer owns one source and binds three collaborators into one
//! logically atomic step per put: append the event to the retention, apply
//! the write to the key-value store, advance the source's high watermark.
//! All writes for the source serialize through the writer's stripe lock;
//! writers for different sources are independent, even when they share a
//! retention or a clock.

use std::sync::Arc;

use bytes::Bytes;
use krati_clock::{SourceWaterMarksClock, WaterMarkStore};
use krati_core::{Scn, SourceId};
use krati_store::{DataStore, Storage};
use tracing::debug;

use crate::error::{RetentionError, RetentionResult};
use crate::event::Event;
use crate::retention::SimpleRetention;

/// Writes key-value updates through a retention with watermark tracking.
pub struct SimpleRetentionStoreWriter<D, S, W>
where
    D: DataStore,
    S: Storage,
    W: WaterMarkStore,
{
    /// The writer's source identity.
    source: SourceId,
    /// The change history.
    retention: Arc<SimpleRetention<S>>,
    /// The latest-value store.
    store: Arc<D>,
    /// The source watermark clock, shared with co-writers.
    clock: Arc<SourceWaterMarksClock<W>>,
    /// Serializes this source's writes.
    stripe: tokio::sync::Mutex<()>,
}

impl<D, S, W> SimpleRetentionStoreWriter<D, S, W>
where
    D: DataStore,
    S: Storage,
    W: WaterMarkStore,
{
    /// Creates a writer for one source.
    ///
    /// # Errors
    /// Returns an error if the source is not declared by the retention or
    /// the clock, or if the clock's source order differs from the
    /// retention's (their clocks would be incompatible).
    pub fn new(
        source: SourceId,
        retention: Arc<SimpleRetention<S>>,
        store: Arc<D>,
        clock: Arc<SourceWaterMarksClock<W>>,
    ) -> RetentionResult<Self> {
        if clock.sources() != retention.sources() {
            return Err(RetentionError::InvalidConfig {
                reason: "clock source order must match the retention's",
            });
        }
        clock.source_index(&source)?;

        Ok(Self {
            source,
            retention,
            store,
            clock,
            stripe: tokio::sync::Mutex::new(()),
        })
    }

    /// Returns the writer's source.
    #[must_use]
    pub const fn source(&self) -> &SourceId {
        &self.source
    }

    /// Returns the source's current high watermark.
    ///
    /// # Errors
    /// Returns `UnknownSource` if the clock no longer knows the source.
    pub fn get_high_water_mark(&self) -> RetentionResult<Scn> {
        Ok(self.clock.high_water_mark(&self.source)?)
    }

    /// Applies a put: retention append, store put, watermark advance.
    ///
    /// # Errors
    /// Returns `ClockRegression` if `scn` is behind the source's high
    /// watermark (retention and store are untouched), storage errors from
    /// either collaborator, and `InvariantViolation` if the watermark
    /// cannot be advanced after the data was applied.
    pub async fn put(&self, key: Bytes, value: Bytes, scn: Scn) -> RetentionResult<()> {
        let _stripe = self.stripe.lock().await;

        let current = self.clock.high_water_mark(&self.source)?;
        if scn < current {
            return Err(RetentionError::ClockRegression {
                source_id: self.source.clone(),
                current,
                requested: scn,
            });
        }

        let event_clock = self.clock.snapshot_with(&self.source, scn)?;
        let event = Event::new(self.source.clone(), key.clone(), value.clone(), event_clock);

        self.retention.append(event).await?;
        self.store.put(key, value).await?;

        self.clock.advance(&self.source, scn).map_err(|_| {
            RetentionError::InvariantViolation {
                message: "watermark advance failed after the write was applied",
            }
        })?;

        debug!(source = %self.source, scn = scn.get(), "Applied put");
        Ok(())
    }

    /// Applies a delete as a tombstone event.
    ///
    /// # Errors
    /// As for [`SimpleRetentionStoreWriter::put`].
    pub async fn delete(&self, key: Bytes, scn: Scn) -> RetentionResult<()> {
        let _stripe = self.stripe.lock().await;

        let current = self.clock.high_water_mark(&self.source)?;
        if scn < current {
            return Err(RetentionError::ClockRegression {
                source_id: self.source.clone(),
                current,
                requested: scn,
            });
        }

        let event_clock = self.clock.snapshot_with(&self.source, scn)?;
        let event = Event::tombstone(self.source.clone(), key.clone(), event_clock);

        self.retention.append(event).await?;
        self.store.delete(&key).await?;

        self.clock.advance(&self.source, scn).map_err(|_| {
            RetentionError::InvariantViolation {
                message: "watermark advance failed after the delete was applied",
            }
        })?;

        debug!(source = %self.source, scn = scn.get(), "Applied delete");
        Ok(())
    }

    /// Flushes retention segments, the store, and then the watermarks.
    ///
    /// The watermark flush comes last: the low watermark must never claim
    /// durability the data files do not have.
    ///
    /// # Errors
    /// Returns the first collaborator error.
    pub async fn flush(&self) -> RetentionResult<()> {
        self.retention.flush().await?;
        self.store.flush().await?;
        self.clock.flush().await?;
        Ok(())
    }

    /// Flushes and closes the store.
    ///
    /// # Errors
    /// Returns the first collaborator error.
    pub async fn close(&self) -> RetentionResult<()> {
        self.flush().await?;
        self.store.close().await?;
        Ok(())
    }
}
