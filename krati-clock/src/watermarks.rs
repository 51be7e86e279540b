//! The persisted source watermark clock.
//!
//! [`SourceWaterMarksClock`] owns one clock coordinate per declared source.
//! The high watermark moves in memory on every append; `flush` persists the
//! highs as the new lows. On restart the low watermark is authoritative:
//! anything above it was never acknowledged as durable.

use std::collections::HashMap;
use std::sync::Mutex;

use krati_core::limits::CLOCK_SOURCES_COUNT_MAX;
use krati_core::{Scn, SourceId};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{ClockError, ClockResult};
use crate::storage::WaterMarkStore;

/// A per-source watermark pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterMark {
    /// Largest scn durably flushed for the source.
    pub low: Scn,
    /// Largest scn applied in memory for the source.
    pub high: Scn,
}

/// A clock plus durable storage for its watermarks.
///
/// The declared source list fixes the clock's source order; it is
/// process-wide configuration and is validated against the persisted
/// watermark file on startup.
///
/// # Thread Safety
///
/// Shared by all writers of its sources; in-memory marks live behind a
/// short mutex that is never held across `.await`.
pub struct SourceWaterMarksClock<W: WaterMarkStore> {
    /// Declared sources, in clock coordinate order.
    sources: Vec<SourceId>,
    /// Source name to coordinate index.
    index: HashMap<SourceId, usize>,
    /// Watermark per source, same order as `sources`.
    marks: Mutex<Vec<WaterMark>>,
    /// Durable storage.
    store: W,
}

impl<W: WaterMarkStore> SourceWaterMarksClock<W> {
    /// Opens the clock, loading persisted watermarks.
    ///
    /// Highs are reset to the persisted lows: the low watermark is
    /// authoritative after a restart.
    ///
    /// # Errors
    /// Returns `UnknownSource` if the store holds a source that is not in
    /// the declared list, or any storage error.
    ///
    /// # Panics
    /// Panics if the source list is empty, contains duplicates, or exceeds
    /// the source count limit.
    pub async fn open(sources: Vec<SourceId>, store: W) -> ClockResult<Self> {
        assert!(!sources.is_empty(), "at least one source is required");
        assert!(
            sources.len() <= CLOCK_SOURCES_COUNT_MAX as usize,
            "too many sources"
        );

        let mut index = HashMap::with_capacity(sources.len());
        for (position, source) in sources.iter().enumerate() {
            let previous = index.insert(source.clone(), position);
            assert!(previous.is_none(), "duplicate source in clock order");
        }

        let mut marks = vec![
            WaterMark {
                low: Scn::new(0),
                high: Scn::new(0),
            };
            sources.len()
        ];

        for (source, low, _high) in store.load().await? {
            let position = *index
                .get(&source)
                .ok_or(ClockError::UnknownSource { source_id: source })?;
            marks[position] = WaterMark { low, high: low };
        }

        info!(sources = sources.len(), "Opened source watermarks clock");

        Ok(Self {
            sources,
            index,
            marks: Mutex::new(marks),
            store,
        })
    }

    /// Returns the declared sources in clock coordinate order.
    #[must_use]
    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    /// Returns the coordinate index of a source.
    ///
    /// # Errors
    /// Returns `UnknownSource` if the source is not declared.
    pub fn source_index(&self, source: &SourceId) -> ClockResult<usize> {
        self.index
            .get(source)
            .copied()
            .ok_or_else(|| ClockError::UnknownSource {
                source_id: source.clone(),
            })
    }

    /// Returns a snapshot of the current high watermarks as a clock.
    ///
    /// The snapshot is a copy, not an alias: later advances do not mutate
    /// a previously returned clock.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn current(&self) -> Clock {
        let marks = self.marks.lock().expect("watermarks lock poisoned");
        Clock::new(marks.iter().map(|m| m.high.get()).collect())
    }

    /// Returns the in-memory high watermark for a source.
    ///
    /// # Errors
    /// Returns `UnknownSource` if the source is not declared.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn high_water_mark(&self, source: &SourceId) -> ClockResult<Scn> {
        let position = self.source_index(source)?;
        let marks = self.marks.lock().expect("watermarks lock poisoned");
        Ok(marks[position].high)
    }

    /// Returns the durable low watermark for a source.
    ///
    /// # Errors
    /// Returns `UnknownSource` if the source is not declared.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn low_water_mark(&self, source: &SourceId) -> ClockResult<Scn> {
        let position = self.source_index(source)?;
        let marks = self.marks.lock().expect("watermarks lock poisoned");
        Ok(marks[position].low)
    }

    /// Advances the in-memory high watermark for a source to
    /// `max(current, scn)`.
    ///
    /// # Errors
    /// Returns `UnknownSource` if the source is not declared.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn advance(&self, source: &SourceId, scn: Scn) -> ClockResult<()> {
        let position = self.source_index(source)?;
        let mut marks = self.marks.lock().expect("watermarks lock poisoned");
        if scn > marks[position].high {
            marks[position].high = scn;
            debug!(%source, scn = scn.get(), "Advanced high watermark");
        }
        Ok(())
    }

    /// Returns the current clock with one source coordinate overridden.
    ///
    /// This is the clock an event carries: the writer's view of every other
    /// source plus its own scn for this write.
    ///
    /// # Errors
    /// Returns `UnknownSource` if the source is not declared.
    pub fn snapshot_with(&self, source: &SourceId, scn: Scn) -> ClockResult<Clock> {
        let position = self.source_index(source)?;
        Ok(self.current().with_coordinate(position, scn.get()))
    }

    /// Persists the current high watermarks as the new low watermarks.
    ///
    /// Durable on return. On failure the in-memory lows are unchanged.
    ///
    /// # Errors
    /// Returns the storage error if persistence fails.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub async fn flush(&self) -> ClockResult<()> {
        let highs: Vec<Scn> = {
            let marks = self.marks.lock().expect("watermarks lock poisoned");
            marks.iter().map(|m| m.high).collect()
        };

        let entries: Vec<_> = self
            .sources
            .iter()
            .zip(&highs)
            .map(|(source, &high)| (source.clone(), high, high))
            .collect();

        self.store.save(&entries).await?;

        {
            let mut marks = self.marks.lock().expect("watermarks lock poisoned");
            for (mark, &high) in marks.iter_mut().zip(&highs) {
                if high > mark.low {
                    mark.low = high;
                }
            }
        }

        info!(sources = self.sources.len(), "Flushed watermarks");
        Ok(())
    }

    /// Alias for [`SourceWaterMarksClock::flush`].
    ///
    /// # Errors
    /// Returns the storage error if persistence fails.
    pub async fn sync_water_marks(&self) -> ClockResult<()> {
        self.flush().await
    }
}
