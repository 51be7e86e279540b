//! Event batches.
//!
//! A batch is a capacity-bounded, append-only run of events. Events carry
//! clocks that never regress on the appending source's own coordinate. A
//! full batch is sealed and becomes immutable; one sealed batch is
//! persisted as one segment record.
//!
//! # Segment Record Format
//!
//! ```text
//! +-------+---------+-------+----------+----------+-------+----------+
//! | Magic | Version |  CRC  | BatchId  | Capacity | Count | ClockDim |
//! |  (8)  |   (4)   |  (4)  |   (8)    |   (4)    |  (4)  |   (4)    |
//! +-------+---------+-------+----------+----------+-------+----------+
//! | CreatedAt | MinClock  | MaxClock  | Event 0 | Event 1 |   ...    |
//! |    (8)    | (dim * 8) | (dim * 8) |         |         |          |
//! +-----------+-----------+-----------+---------+---------+----------+
//! ```
//!
//! CRC32 covers everything after the CRC field. All integers are stored in
//! little-endian format.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use krati_clock::{Clock, CLOCK_COORDINATE_SIZE};
use krati_core::limits::BATCH_EVENTS_COUNT_MAX;
use krati_core::{BatchId, Scn, SourceId};

use crate::config::SourceOrder;
use crate::error::{RetentionError, RetentionResult};
use crate::event::Event;

/// Magic bytes identifying a Krati batch segment.
const BATCH_MAGIC: &[u8; 8] = b"KRATIBCH";

/// Current segment format version.
const BATCH_VERSION: u32 = 1;

/// Size of the fixed batch header in bytes (before the min/max clocks).
pub const BATCH_FIXED_HEADER_SIZE: usize = 8 + 4 + 4 + 8 + 4 + 4 + 4 + 8;

/// Returns the current wall-clock time in milliseconds since the epoch.
#[allow(clippy::cast_possible_truncation)] // Millis won't overflow i64 for centuries.
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A capacity-bounded ordered run of events, sealed on fill.
#[derive(Debug, Clone)]
pub struct EventBatch {
    /// Batch identifier, dense within one retention.
    id: BatchId,
    /// Maximum number of events.
    capacity: u32,
    /// Source order shared with the owning retention.
    order: Arc<SourceOrder>,
    /// Creation timestamp in epoch milliseconds.
    created_at: i64,
    /// The events, in append order.
    events: Vec<Event>,
    /// First event's clock (ZERO while empty).
    min_clock: Clock,
    /// Last event's clock (ZERO while empty).
    max_clock: Clock,
    /// Whether the batch is sealed (read-only).
    sealed: bool,
}

impl EventBatch {
    /// Creates an empty open batch.
    ///
    /// # Panics
    /// Panics if `capacity` is zero or exceeds the batch event limit.
    #[must_use]
    pub fn new(id: BatchId, capacity: u32, order: Arc<SourceOrder>) -> Self {
        assert!(capacity > 0, "batch capacity must be positive");
        assert!(
            capacity <= BATCH_EVENTS_COUNT_MAX,
            "batch capacity exceeds limit"
        );

        Self {
            id,
            capacity,
            order,
            created_at: now_millis(),
            events: Vec::new(),
            min_clock: Clock::ZERO,
            max_clock: Clock::ZERO,
            sealed: false,
        }
    }

    /// Returns the batch identifier.
    #[must_use]
    pub const fn id(&self) -> BatchId {
        self.id
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the creation timestamp in epoch milliseconds.
    #[must_use]
    pub const fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Returns the number of events in the batch.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Bounded by capacity.
    pub fn len(&self) -> u32 {
        self.events.len() as u32
    }

    /// Returns true if the batch holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns true if the batch is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Returns true if the batch is sealed (read-only).
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns the first event's clock, or ZERO while empty.
    #[must_use]
    pub const fn min_clock(&self) -> &Clock {
        &self.min_clock
    }

    /// Returns the last event's clock, or ZERO while empty.
    #[must_use]
    pub const fn max_clock(&self) -> &Clock {
        &self.max_clock
    }

    /// Returns the events in append order.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Appends an event.
    ///
    /// # Errors
    /// Returns `BatchFull` if the batch is sealed or at capacity, and
    /// `ClockRegression` if the event's clock is behind the batch's current
    /// max clock on the appending source's coordinate.
    pub fn append(&mut self, event: Event) -> RetentionResult<()> {
        if self.sealed {
            return Err(RetentionError::BatchFull {
                reason: "batch is sealed",
            });
        }
        if self.is_full() {
            return Err(RetentionError::BatchFull {
                reason: "capacity reached",
            });
        }

        let coordinate = self.order.index_of(&event.source)?;
        if event.clock.dimension() != self.order.dimension() {
            return Err(krati_clock::ClockError::DimensionMismatch {
                left: event.clock.dimension(),
                right: self.order.dimension(),
            }
            .into());
        }

        if !self.events.is_empty() {
            let current = self.max_clock.coordinate(coordinate);
            let requested = event.clock.coordinate(coordinate);
            if requested < current {
                return Err(RetentionError::ClockRegression {
                    source_id: event.source.clone(),
                    current: Scn::new(current),
                    requested: Scn::new(requested),
                });
            }
        }

        if self.events.is_empty() {
            self.min_clock = event.clock.clone();
        }
        self.max_clock = event.clock.clone();
        self.events.push(event);
        Ok(())
    }

    /// Seals the batch, preventing further appends. Idempotent.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Returns the event at `offset`.
    ///
    /// # Errors
    /// Returns `OffsetOutOfRange` if the offset is past the last event.
    pub fn lookup(&self, offset: u32) -> RetentionResult<&Event> {
        self.events
            .get(offset as usize)
            .ok_or(RetentionError::OffsetOutOfRange {
                offset,
                count: self.len(),
            })
    }

    /// Returns the last scn this source wrote into the batch, if any.
    ///
    /// A source's own coordinate is strictly its writer's scn, so the last
    /// matching event carries the maximum.
    #[must_use]
    pub fn last_scn_of_source(&self, source: &SourceId, coordinate: usize) -> Option<Scn> {
        self.events
            .iter()
            .rev()
            .find(|e| &e.source == source)
            .map(|e| e.scn(coordinate))
    }

    /// Returns the offset of the first event from `source` with an scn
    /// strictly greater than `scn`, if any.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Bounded by capacity.
    pub fn first_offset_after(
        &self,
        source: &SourceId,
        coordinate: usize,
        scn: Scn,
    ) -> Option<u32> {
        self.events
            .iter()
            .position(|e| &e.source == source && e.scn(coordinate) > scn)
            .map(|offset| offset as u32)
    }

    /// Encodes the batch as one segment record.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Sizes bounded by limits.
    pub fn encode(&self) -> Bytes {
        let dimension = self.order.dimension();
        let clock_bytes = dimension as usize * CLOCK_COORDINATE_SIZE;
        let events_size: usize = self.events.iter().map(Event::encoded_size).sum();

        let mut body =
            BytesMut::with_capacity(BATCH_FIXED_HEADER_SIZE - 16 + 2 * clock_bytes + events_size);
        body.put_u64_le(self.id.get());
        body.put_u32_le(self.capacity);
        body.put_u32_le(self.len());
        body.put_u32_le(dimension);
        body.put_i64_le(self.created_at);

        // Min and max clocks are widened to the full dimension while empty.
        for index in 0..dimension as usize {
            body.put_u64_le(self.min_clock.coordinate(index));
        }
        for index in 0..dimension as usize {
            body.put_u64_le(self.max_clock.coordinate(index));
        }

        for event in &self.events {
            event.encode(&mut body);
        }

        let crc = crc32fast::hash(&body);
        let mut buf = BytesMut::with_capacity(16 + body.len());
        buf.put_slice(BATCH_MAGIC);
        buf.put_u32_le(BATCH_VERSION);
        buf.put_u32_le(crc);
        buf.put_slice(&body);
        buf.freeze()
    }

    /// Decodes a segment record into a sealed batch.
    ///
    /// # Errors
    /// Returns `InvalidSegment` or `ChecksumMismatch` if the bytes are not
    /// a well-formed batch for this source order.
    pub fn decode(data: &[u8], order: Arc<SourceOrder>) -> RetentionResult<Self> {
        if data.len() < BATCH_FIXED_HEADER_SIZE {
            return Err(RetentionError::InvalidSegment {
                reason: "shorter than fixed header",
            });
        }

        let mut buf = data;
        let mut magic = [0u8; 8];
        buf.copy_to_slice(&mut magic);
        if &magic != BATCH_MAGIC {
            return Err(RetentionError::InvalidSegment {
                reason: "bad magic",
            });
        }
        let version = buf.get_u32_le();
        if version != BATCH_VERSION {
            return Err(RetentionError::InvalidSegment {
                reason: "unsupported version",
            });
        }

        let expected_crc = buf.get_u32_le();
        let actual_crc = crc32fast::hash(buf);
        if actual_crc != expected_crc {
            return Err(RetentionError::ChecksumMismatch {
                expected: expected_crc,
                actual: actual_crc,
            });
        }

        let id = BatchId::new(buf.get_u64_le());
        let capacity = buf.get_u32_le();
        let count = buf.get_u32_le();
        let dimension = buf.get_u32_le();
        let created_at = buf.get_i64_le();

        if dimension != order.dimension() {
            return Err(RetentionError::InvalidSegment {
                reason: "clock dimension does not match source order",
            });
        }
        if capacity == 0 || capacity > BATCH_EVENTS_COUNT_MAX || count > capacity {
            return Err(RetentionError::InvalidSegment {
                reason: "implausible capacity or count",
            });
        }

        let clock_bytes = dimension as usize * CLOCK_COORDINATE_SIZE;
        if buf.remaining() < 2 * clock_bytes {
            return Err(RetentionError::InvalidSegment {
                reason: "truncated header clocks",
            });
        }
        let min_raw = buf.copy_to_bytes(clock_bytes);
        let max_raw = buf.copy_to_bytes(clock_bytes);
        let min_clock = Clock::decode(&min_raw, dimension).map_err(RetentionError::Clock)?;
        let max_clock = Clock::decode(&max_raw, dimension).map_err(RetentionError::Clock)?;

        let mut events = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let event =
                Event::decode(&mut buf, dimension).ok_or(RetentionError::InvalidSegment {
                    reason: "truncated event",
                })?;
            events.push(event);
        }

        Ok(Self {
            id,
            capacity,
            order,
            created_at,
            events,
            min_clock,
            max_clock,
            sealed: true,
        })
    }
}
