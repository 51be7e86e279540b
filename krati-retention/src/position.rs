//! Replay positions.
//!
//! A position is the opaque cursor a consumer carries between reads. It
//! has two shapes: *indexed* (a byte-exact offset inside a sealed batch of
//! the retention) and *streaming* (a clock filter for events newer than
//! everything already delivered). A consumer session transitions from
//! indexed to streaming exactly once and never back.
//!
//! Serialization is tag-first so the shape is known before any field is
//! read:
//!
//! ```text
//! +------+-----------+--------+----------+--------+----------+----------+
//! | Tag  | SourceLen | Source | ClockDim | Clock  | BatchId* | Offset*  |
//! | (1)  |    (4)    |  (N)   |   (4)    |(dim*8) |   (8)    |   (4)    |
//! +------+-----------+--------+----------+--------+----------+----------+
//! ```
//!
//! Fields marked `*` are present only for the indexed shape (tag 0).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use krati_clock::{Clock, CLOCK_COORDINATE_SIZE};
use krati_core::{BatchId, SourceId};

use crate::error::{RetentionError, RetentionResult};

/// Tag byte for an indexed position.
const TAG_INDEXED: u8 = 0;
/// Tag byte for a streaming position.
const TAG_STREAMING: u8 = 1;
/// Tag byte for a composite position.
const TAG_COMPOSITE: u8 = 2;

/// A single-source replay cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// Pointing inside a sealed batch of the retention.
    Indexed {
        /// The reader source.
        source: SourceId,
        /// The batch the cursor is in.
        batch: BatchId,
        /// Offset of the next event to examine within the batch.
        offset: u32,
        /// Clock of the last delivered event (the replay start clock until
        /// something is delivered).
        clock: Clock,
    },
    /// Tailing the retention: every event with a source coordinate
    /// strictly greater than this clock has not yet been delivered.
    Streaming {
        /// The reader source.
        source: SourceId,
        /// Clock of the last delivered event.
        clock: Clock,
    },
}

impl Position {
    /// Returns true if the position still points into sealed history.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed { .. })
    }

    /// Returns the reader source.
    #[must_use]
    pub const fn source(&self) -> &SourceId {
        match self {
            Self::Indexed { source, .. } | Self::Streaming { source, .. } => source,
        }
    }

    /// Returns the position clock.
    #[must_use]
    pub const fn clock(&self) -> &Clock {
        match self {
            Self::Indexed { clock, .. } | Self::Streaming { clock, .. } => clock,
        }
    }

    /// Encodes the position, tag first.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Indexed {
                source,
                batch,
                offset,
                clock,
            } => {
                buf.put_u8(TAG_INDEXED);
                encode_source(source, buf);
                encode_clock(clock, buf);
                buf.put_u64_le(batch.get());
                buf.put_u32_le(*offset);
            }
            Self::Streaming { source, clock } => {
                buf.put_u8(TAG_STREAMING);
                encode_source(source, buf);
                encode_clock(clock, buf);
            }
        }
    }

    /// Encodes the position to a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes a position, tag first.
    ///
    /// # Errors
    /// Returns `InvalidPosition` if the bytes are malformed.
    pub fn decode(buf: &mut impl Buf) -> RetentionResult<Self> {
        if buf.remaining() < 1 {
            return Err(RetentionError::InvalidPosition { reason: "empty" });
        }
        let tag = buf.get_u8();
        match tag {
            TAG_INDEXED => {
                let source = decode_source(buf)?;
                let clock = decode_clock(buf)?;
                if buf.remaining() < 12 {
                    return Err(RetentionError::InvalidPosition {
                        reason: "truncated indexed fields",
                    });
                }
                let batch = BatchId::new(buf.get_u64_le());
                let offset = buf.get_u32_le();
                Ok(Self::Indexed {
                    source,
                    batch,
                    offset,
                    clock,
                })
            }
            TAG_STREAMING => {
                let source = decode_source(buf)?;
                let clock = decode_clock(buf)?;
                Ok(Self::Streaming { source, clock })
            }
            _ => Err(RetentionError::InvalidPosition {
                reason: "unknown tag",
            }),
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Indexed {
                source,
                batch,
                offset,
                ..
            } => write!(f, "indexed({source}, {batch}, offset={offset})"),
            Self::Streaming { source, clock } => write!(f, "streaming({source}, {clock})"),
        }
    }
}

/// A fan-in cursor over several single-source readers.
///
/// Holds one sub-position per constituent reader, a global clock that is
/// the per-coordinate maximum of the sub-positions' clocks over the
/// composite's union source order, and the fairness cursor for round-robin
/// scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositePosition {
    /// Sub-positions, one per reader, in reader order.
    children: Vec<Position>,
    /// Per-coordinate maximum of the sub-positions' clocks.
    clock: Clock,
    /// Index of the next child to poll.
    cursor: u32,
}

impl CompositePosition {
    /// Creates a composite position.
    pub(crate) const fn new(children: Vec<Position>, clock: Clock, cursor: u32) -> Self {
        Self {
            children,
            clock,
            cursor,
        }
    }

    /// Returns true iff any sub-position is still indexed.
    ///
    /// This turning false is the "caught up" signal for consumers.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.children.iter().any(Position::is_indexed)
    }

    /// Returns the sub-positions in reader order.
    #[must_use]
    pub fn children(&self) -> &[Position] {
        &self.children
    }

    /// Returns the global clock.
    #[must_use]
    pub const fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns the index of the next child to poll.
    #[must_use]
    pub const fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Encodes the composite position, tag first.
    #[allow(clippy::cast_possible_truncation)] // Child count bounded by reader count.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(TAG_COMPOSITE);
        buf.put_u32_le(self.children.len() as u32);
        for child in &self.children {
            child.encode(buf);
        }
        encode_clock(&self.clock, buf);
        buf.put_u32_le(self.cursor);
    }

    /// Encodes the composite position to a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes a composite position, tag first.
    ///
    /// # Errors
    /// Returns `InvalidPosition` if the bytes are malformed.
    pub fn decode(buf: &mut impl Buf) -> RetentionResult<Self> {
        if buf.remaining() < 5 {
            return Err(RetentionError::InvalidPosition { reason: "empty" });
        }
        let tag = buf.get_u8();
        if tag != TAG_COMPOSITE {
            return Err(RetentionError::InvalidPosition {
                reason: "not a composite position",
            });
        }

        let count = buf.get_u32_le() as usize;
        let mut children = Vec::with_capacity(count);
        for _ in 0..count {
            children.push(Position::decode(buf)?);
        }
        let clock = decode_clock(buf)?;
        if buf.remaining() < 4 {
            return Err(RetentionError::InvalidPosition {
                reason: "truncated cursor",
            });
        }
        let cursor = buf.get_u32_le();
        Ok(Self {
            children,
            clock,
            cursor,
        })
    }
}

impl std::fmt::Display for CompositePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "composite[")?;
        for (index, child) in self.children.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{child}")?;
        }
        write!(f, "]")
    }
}

#[allow(clippy::cast_possible_truncation)] // Source names bounded in practice.
fn encode_source(source: &SourceId, buf: &mut BytesMut) {
    let bytes = source.as_str().as_bytes();
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn decode_source(buf: &mut impl Buf) -> RetentionResult<SourceId> {
    if buf.remaining() < 4 {
        return Err(RetentionError::InvalidPosition {
            reason: "truncated source length",
        });
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(RetentionError::InvalidPosition {
            reason: "truncated source name",
        });
    }
    let bytes = buf.copy_to_bytes(len);
    let name = std::str::from_utf8(&bytes).map_err(|_| RetentionError::InvalidPosition {
        reason: "source name is not UTF-8",
    })?;
    Ok(SourceId::new(name))
}

fn encode_clock(clock: &Clock, buf: &mut BytesMut) {
    buf.put_u32_le(clock.dimension());
    clock.encode(buf);
}

fn decode_clock(buf: &mut impl Buf) -> RetentionResult<Clock> {
    if buf.remaining() < 4 {
        return Err(RetentionError::InvalidPosition {
            reason: "truncated clock dimension",
        });
    }
    let dimension = buf.get_u32_le();
    let clock_bytes = dimension as usize * CLOCK_COORDINATE_SIZE;
    if buf.remaining() < clock_bytes {
        return Err(RetentionError::InvalidPosition {
            reason: "truncated clock",
        });
    }
    let raw = buf.copy_to_bytes(clock_bytes);
    Clock::decode(&raw, dimension).map_err(RetentionError::Clock)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed() -> Position {
        Position::Indexed {
            source: SourceId::new("source1"),
            batch: BatchId::new(3),
            offset: 42,
            clock: Clock::new(vec![10, 20]),
        }
    }

    fn streaming() -> Position {
        Position::Streaming {
            source: SourceId::new("source2"),
            clock: Clock::new(vec![5]),
        }
    }

    #[test]
    fn test_shape_predicate() {
        assert!(indexed().is_indexed());
        assert!(!streaming().is_indexed());
    }

    #[test]
    fn test_indexed_roundtrip() {
        let position = indexed();
        let bytes = position.to_bytes();
        let decoded = Position::decode(&mut bytes.clone()).unwrap();
        assert_eq!(decoded, position);
    }

    #[test]
    fn test_streaming_roundtrip() {
        let position = streaming();
        let bytes = position.to_bytes();
        let decoded = Position::decode(&mut bytes.clone()).unwrap();
        assert_eq!(decoded, position);
    }

    #[test]
    fn test_tag_is_first_byte() {
        assert_eq!(indexed().to_bytes()[0], TAG_INDEXED);
        assert_eq!(streaming().to_bytes()[0], TAG_STREAMING);
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let result = Position::decode(&mut &[9u8, 0, 0, 0, 0][..]);
        assert!(matches!(
            result,
            Err(RetentionError::InvalidPosition { .. })
        ));
    }

    #[test]
    fn test_composite_roundtrip() {
        let position = CompositePosition::new(
            vec![indexed(), streaming()],
            Clock::new(vec![10, 20, 5]),
            1,
        );
        assert!(position.is_indexed());

        let bytes = position.to_bytes();
        assert_eq!(bytes[0], TAG_COMPOSITE);

        let decoded = CompositePosition::decode(&mut bytes.clone()).unwrap();
        assert_eq!(decoded, position);
    }

    #[test]
    fn test_composite_all_streaming_is_not_indexed() {
        let position =
            CompositePosition::new(vec![streaming(), streaming()], Clock::new(vec![5, 5]), 0);
        assert!(!position.is_indexed());
    }

    #[test]
    fn test_truncated_decode_fails() {
        let bytes = indexed().to_bytes();
        let truncated = &bytes[..bytes.len() - 2];
        assert!(Position::decode(&mut &truncated[..]).is_err());
    }
}
