//! The bounded retention log.
//!
//! A retention is an ordered sequence of sealed batches plus one open
//! batch. Appends fill the open batch; a full batch is sealed with a
//! single pointer swap, persisted as a segment file, and the eviction
//! policy drops the oldest sealed batches beyond its bound. Readers
//! resolve clocks to positions and pull events through the
//! indexed-then-streaming state machine.
//!
//! # File Layout
//!
//! ```text
//! <home>/retention-<id>/segments/
//!   batch-0000000000000000.seg   # Sealed batch 0
//!   batch-0000000000000001.seg   # Sealed batch 1
//! ```
//!
//! The open batch is volatile: durability of an append is guaranteed only
//! once its batch is sealed and flushed. The source watermark file is what
//! makes that safe across restarts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use krati_clock::{Clock, ClockError};
use krati_core::{BatchId, RetentionId, Scn, SourceId};
use krati_store::Storage;
use tracing::{debug, info, warn};

use crate::batch::EventBatch;
use crate::config::{RetentionConfig, SourceOrder};
use crate::error::{RetentionError, RetentionResult};
use crate::event::Event;
use crate::policy::BatchSummary;
use crate::position::Position;

/// In-memory retention state, guarded by a short lock.
struct RetentionInner {
    /// Sealed batches by dense id.
    sealed: BTreeMap<BatchId, Arc<EventBatch>>,
    /// The open batch receiving appends.
    open: EventBatch,
    /// Whether any sealed batch was ever evicted.
    evicted: bool,
    /// Sealed batches written but not yet fsynced.
    dirty: BTreeSet<BatchId>,
}

/// Work captured during a seal, performed outside the state lock.
struct RotationWork {
    /// The batch that was just sealed.
    sealed: Arc<EventBatch>,
    /// Batches evicted by policy, oldest first.
    evicted: Vec<BatchId>,
}

/// An append-only, segmented, bounded-history stream of change events.
///
/// # Thread Safety
///
/// Appends are serialized through one async lock; readers take only a
/// short state lock and never block appends on file I/O. Sealed batches
/// are immutable and shared with readers by `Arc`.
pub struct SimpleRetention<S: Storage> {
    /// Configuration.
    config: RetentionConfig,
    /// The fixed source order of this retention's clocks.
    order: Arc<SourceOrder>,
    /// Storage backend for segment files.
    storage: Arc<S>,
    /// Directory holding the segment files.
    segments_dir: PathBuf,
    /// In-memory state.
    inner: RwLock<RetentionInner>,
    /// Serializes appends (and the file I/O a seal performs).
    append_lock: tokio::sync::Mutex<()>,
}

impl<S: Storage> SimpleRetention<S> {
    /// Opens or creates a retention in the configured home directory.
    ///
    /// Existing segment files are recovered as sealed batches; corrupt
    /// segments are skipped with a warning. The eviction floor is
    /// re-derived structurally: a nonzero oldest batch id means history
    /// below it was evicted before the restart.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the segment
    /// directory cannot be read.
    pub async fn open(storage: S, config: RetentionConfig) -> RetentionResult<Self> {
        config.validate()?;

        let order = Arc::new(SourceOrder::new(config.sources.clone()));
        let storage = Arc::new(storage);
        let segments_dir = config
            .home_dir
            .join(format!("retention-{}", config.id.get()))
            .join("segments");
        storage.create_dir_all(&segments_dir).await?;

        let mut sealed = BTreeMap::new();
        for path in storage.list_files(&segments_dir, "seg").await? {
            let file = storage.open(&path).await?;
            let data = file.read_all().await?;

            match EventBatch::decode(&data, order.clone()) {
                Ok(batch) => {
                    info!(
                        retention = %config.id,
                        batch = %batch.id(),
                        events = batch.len(),
                        "Recovered sealed batch"
                    );
                    sealed.insert(batch.id(), Arc::new(batch));
                }
                Err(e) => {
                    warn!(?path, error = %e, "Failed to recover segment, skipping");
                }
            }
        }

        let next_batch = sealed
            .keys()
            .next_back()
            .map_or(BatchId::new(0), |id| id.next());
        let evicted = sealed.keys().next().is_some_and(|id| id.get() > 0);

        info!(
            retention = %config.id,
            sealed = sealed.len(),
            next_batch = %next_batch,
            evicted,
            "Retention recovery complete"
        );

        let open = EventBatch::new(next_batch, config.batch_size, order.clone());

        Ok(Self {
            config,
            order,
            storage,
            segments_dir,
            inner: RwLock::new(RetentionInner {
                sealed,
                open,
                evicted,
                dirty: BTreeSet::new(),
            }),
            append_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Returns the retention identifier.
    #[must_use]
    pub const fn id(&self) -> RetentionId {
        self.config.id
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Returns the writer sources in clock coordinate order.
    #[must_use]
    pub fn sources(&self) -> &[SourceId] {
        self.order.sources()
    }

    /// Returns the number of sealed batches currently retained.
    ///
    /// # Panics
    /// Panics if the state lock is poisoned.
    #[must_use]
    pub fn sealed_batch_count(&self) -> u32 {
        let inner = self.inner.read().expect("retention lock poisoned");
        #[allow(clippy::cast_possible_truncation)] // Bounded by the policy.
        let count = inner.sealed.len() as u32;
        count
    }

    /// Returns the min clock of the oldest retained sealed batch, if any.
    ///
    /// # Panics
    /// Panics if the state lock is poisoned.
    #[must_use]
    pub fn oldest_min_clock(&self) -> Option<Clock> {
        let inner = self.inner.read().expect("retention lock poisoned");
        inner
            .sealed
            .values()
            .next()
            .map(|batch| batch.min_clock().clone())
    }

    /// Appends an event.
    ///
    /// If the event fills the open batch, the batch is sealed, written as a
    /// segment file, and the eviction policy is applied. The append is
    /// durable once its batch is sealed and flushed.
    ///
    /// # Errors
    /// Returns `ClockRegression` for a stale event clock and storage errors
    /// from segment persistence.
    pub async fn append(&self, event: Event) -> RetentionResult<()> {
        let _append = self.append_lock.lock().await;

        // Mutate memory under the short lock; capture file work for after.
        let rotation = {
            let mut inner = self.inner.write().expect("retention lock poisoned");
            inner.open.append(event)?;
            if inner.open.is_full() {
                Some(self.rotate_locked(&mut inner))
            } else {
                None
            }
        };

        if let Some(work) = rotation {
            self.persist_rotation(&work).await?;
        }

        Ok(())
    }

    /// Seals the open batch into the sealed map and applies eviction.
    /// Called with the state lock held; does no I/O.
    fn rotate_locked(&self, inner: &mut RetentionInner) -> RotationWork {
        let next_id = inner.open.id().next();
        let mut full = std::mem::replace(
            &mut inner.open,
            EventBatch::new(next_id, self.config.batch_size, self.order.clone()),
        );
        full.seal();

        let id = full.id();
        let sealed = Arc::new(full);
        inner.sealed.insert(id, sealed.clone());
        inner.dirty.insert(id);

        let summaries: Vec<BatchSummary> = inner
            .sealed
            .values()
            .map(|batch| BatchSummary {
                id: batch.id(),
                events: batch.len(),
                created_at: batch.created_at(),
            })
            .collect();

        let mut evicted = Vec::new();
        for _ in 0..self.config.policy.num_to_evict(&summaries) {
            if let Some((&oldest, _)) = inner.sealed.iter().next() {
                inner.sealed.remove(&oldest);
                inner.dirty.remove(&oldest);
                inner.evicted = true;
                evicted.push(oldest);
            }
        }

        RotationWork { sealed, evicted }
    }

    /// Writes the sealed segment and removes evicted segment files.
    async fn persist_rotation(&self, work: &RotationWork) -> RetentionResult<()> {
        let data = work.sealed.encode();
        let path = self.segment_path(work.sealed.id());
        let file = self.storage.open(&path).await?;
        file.write_at(0, &data).await?;

        info!(
            retention = %self.config.id,
            batch = %work.sealed.id(),
            events = work.sealed.len(),
            bytes = data.len(),
            "Sealed batch"
        );

        for &id in &work.evicted {
            let path = self.segment_path(id);
            if self.storage.exists(&path).await? {
                self.storage.remove(&path).await?;
            }
            info!(retention = %self.config.id, batch = %id, "Evicted batch");
        }

        Ok(())
    }

    /// Fsyncs every sealed segment not yet known durable.
    ///
    /// # Errors
    /// Returns storage errors from the sync.
    ///
    /// # Panics
    /// Panics if the state lock is poisoned.
    pub async fn flush(&self) -> RetentionResult<()> {
        let dirty: Vec<BatchId> = {
            let inner = self.inner.read().expect("retention lock poisoned");
            inner.dirty.iter().copied().collect()
        };

        for id in dirty {
            let path = self.segment_path(id);
            // A dirty batch can be evicted between the snapshot and here.
            if self.storage.exists(&path).await? {
                let file = self.storage.open(&path).await?;
                file.sync().await?;
            }
            let mut inner = self.inner.write().expect("retention lock poisoned");
            inner.dirty.remove(&id);
        }

        debug!(retention = %self.config.id, "Flushed retention segments");
        Ok(())
    }

    /// Resolves a clock to a replay position for one source.
    ///
    /// - A clock at or above the source's newest retained scn yields a
    ///   streaming position.
    /// - A clock below the oldest retained batch's floor yields the
    ///   indexed position `(oldest, 0)` when the full history is still
    ///   present, and fails `RetentionExhausted` once evictions have
    ///   happened (the replay would silently skip dropped events).
    /// - A resync exactly at the floor of an evicted retention also
    ///   yields `(oldest, 0)`: the whole retained history, boundary event
    ///   included.
    /// - Anything else yields the indexed position of the first event from
    ///   this source strictly newer than the clock.
    ///
    /// # Errors
    /// Returns `UnknownSource`, `DimensionMismatch`, or
    /// `RetentionExhausted` as described.
    ///
    /// # Panics
    /// Panics if the state lock is poisoned.
    pub fn position_at(&self, source: &SourceId, clock: &Clock) -> RetentionResult<Position> {
        let coordinate = self.order.index_of(source)?;
        if clock.dimension() != 0 && clock.dimension() != self.order.dimension() {
            return Err(RetentionError::Clock(ClockError::DimensionMismatch {
                left: clock.dimension(),
                right: self.order.dimension(),
            }));
        }
        let requested = Scn::new(clock.coordinate(coordinate));

        let inner = self.inner.read().expect("retention lock poisoned");

        let streaming = Position::Streaming {
            source: source.clone(),
            clock: clock.clone(),
        };

        let Some(newest) = Self::max_scn_locked(&inner, source, coordinate) else {
            return Ok(streaming); // No events from this source yet.
        };
        if requested >= newest {
            return Ok(streaming); // Caught up.
        }

        if let Some((&oldest_id, oldest)) = inner.sealed.iter().next() {
            let floor = Scn::new(oldest.min_clock().coordinate(coordinate));
            let from_oldest = Position::Indexed {
                source: source.clone(),
                batch: oldest_id,
                offset: 0,
                clock: clock.clone(),
            };

            if requested < floor {
                if inner.evicted {
                    return Err(RetentionError::RetentionExhausted {
                        source_id: source.clone(),
                        requested,
                        floor,
                    });
                }
                // Below the floor with full history: replay everything.
                return Ok(from_oldest);
            }

            if requested == floor && inner.evicted {
                // Resync exactly at the floor: the whole retained history,
                // boundary event included.
                return Ok(from_oldest);
            }

            for (&id, batch) in &inner.sealed {
                if batch
                    .last_scn_of_source(source, coordinate)
                    .is_some_and(|scn| scn > requested)
                {
                    if let Some(offset) = batch.first_offset_after(source, coordinate, requested)
                    {
                        return Ok(Position::Indexed {
                            source: source.clone(),
                            batch: id,
                            offset,
                            clock: clock.clone(),
                        });
                    }
                }
            }
        }

        // Only the open batch holds newer events.
        Ok(streaming)
    }

    /// Pulls up to `max_events` events for the position's source, returning
    /// the advanced position.
    ///
    /// An indexed position walks sealed batches by offset and transitions
    /// to streaming exactly once, when it runs past the sealed tail. A
    /// streaming position is a clock filter over anything newer. An empty
    /// result with an unchanged position means "no new data yet".
    ///
    /// # Errors
    /// Returns `RetentionExhausted` if the position's batch was evicted
    /// while the reader held it.
    ///
    /// # Panics
    /// Panics if the state lock is poisoned.
    pub fn read(
        &self,
        position: &Position,
        max_events: usize,
        out: &mut Vec<Event>,
    ) -> RetentionResult<Position> {
        let source = position.source();
        let coordinate = self.order.index_of(source)?;
        let inner = self.inner.read().expect("retention lock poisoned");

        match position {
            Position::Indexed {
                batch, offset, clock, ..
            } => {
                let mut batch_id = *batch;
                let mut offset = *offset as usize;
                let mut last_clock = clock.clone();
                let mut delivered = 0usize;

                loop {
                    if delivered >= max_events {
                        #[allow(clippy::cast_possible_truncation)] // Bounded by batch capacity.
                        let offset = offset as u32;
                        return Ok(Position::Indexed {
                            source: source.clone(),
                            batch: batch_id,
                            offset,
                            clock: last_clock,
                        });
                    }

                    let Some(sealed) = inner.sealed.get(&batch_id) else {
                        if batch_id >= inner.open.id() {
                            // Past the sealed tail: the transition happens
                            // exactly once and never reverses.
                            let streaming = Position::Streaming {
                                source: source.clone(),
                                clock: last_clock,
                            };
                            return Self::read_streaming_locked(
                                &inner,
                                &streaming,
                                coordinate,
                                max_events - delivered,
                                out,
                            );
                        }
                        // The batch was evicted while this reader held it.
                        let floor = inner.sealed.values().next().map_or(Scn::new(0), |b| {
                            Scn::new(b.min_clock().coordinate(coordinate))
                        });
                        return Err(RetentionError::RetentionExhausted {
                            source_id: source.clone(),
                            requested: Scn::new(last_clock.coordinate(coordinate)),
                            floor,
                        });
                    };

                    let events = sealed.events();
                    while offset < events.len() && delivered < max_events {
                        let event = &events[offset];
                        offset += 1;
                        if &event.source == source {
                            last_clock = event.clock.clone();
                            out.push(event.clone());
                            delivered += 1;
                        }
                    }
                    if offset >= events.len() {
                        batch_id = batch_id.next();
                        offset = 0;
                    }
                }
            }
            Position::Streaming { .. } => {
                Self::read_streaming_locked(&inner, position, coordinate, max_events, out)
            }
        }
    }

    /// Streaming read: deliver events from this source strictly newer than
    /// the position clock, in writer order.
    fn read_streaming_locked(
        inner: &RetentionInner,
        position: &Position,
        coordinate: usize,
        max_events: usize,
        out: &mut Vec<Event>,
    ) -> RetentionResult<Position> {
        let source = position.source();
        let clock = position.clock();
        let threshold = Scn::new(clock.coordinate(coordinate));

        // A lagging streaming position below the eviction floor has lost
        // events it never saw.
        if inner.evicted {
            if let Some(oldest) = inner.sealed.values().next() {
                let floor = Scn::new(oldest.min_clock().coordinate(coordinate));
                if threshold < floor {
                    return Err(RetentionError::RetentionExhausted {
                        source_id: source.clone(),
                        requested: threshold,
                        floor,
                    });
                }
            }
        }

        let mut last_clock = clock.clone();
        let mut delivered = 0usize;

        for sealed in inner.sealed.values() {
            if delivered >= max_events {
                break;
            }
            if !sealed
                .last_scn_of_source(source, coordinate)
                .is_some_and(|scn| scn > threshold)
            {
                continue;
            }
            for event in sealed.events() {
                if delivered >= max_events {
                    break;
                }
                if &event.source == source && event.scn(coordinate) > threshold {
                    last_clock = event.clock.clone();
                    out.push(event.clone());
                    delivered += 1;
                }
            }
        }

        if delivered < max_events {
            for event in inner.open.events() {
                if delivered >= max_events {
                    break;
                }
                if &event.source == source && event.scn(coordinate) > threshold {
                    last_clock = event.clock.clone();
                    out.push(event.clone());
                    delivered += 1;
                }
            }
        }

        Ok(Position::Streaming {
            source: source.clone(),
            clock: last_clock,
        })
    }

    /// Returns the newest scn this source has in the retention, if any.
    fn max_scn_locked(
        inner: &RetentionInner,
        source: &SourceId,
        coordinate: usize,
    ) -> Option<Scn> {
        if let Some(scn) = inner.open.last_scn_of_source(source, coordinate) {
            return Some(scn);
        }
        inner
            .sealed
            .values()
            .rev()
            .find_map(|batch| batch.last_scn_of_source(source, coordinate))
    }

    /// Returns the path for a segment file.
    fn segment_path(&self, batch: BatchId) -> PathBuf {
        self.segments_dir
            .join(format!("batch-{:016x}.seg", batch.get()))
    }
}
