//! Change events.
//!
//! An event is the unit read by consumers: the key and value of one write,
//! tagged with the writer's source and the writer's clock at the moment of
//! the put. A `None` value is a tombstone recording a delete.
//!
//! # Wire Format
//!
//! ```text
//! +-----------+--------+----------+---------+-----------+----------+----------+
//! | SourceLen | Source |  KeyLen  |   Key   |  ValueLen |  Value   |  Clock   |
//! | (4 bytes) |(N bytes)| (4 bytes)|(N bytes)| (4 bytes) |(M bytes) |(dim * 8) |
//! +-----------+--------+----------+---------+-----------+----------+----------+
//! ```
//!
//! `ValueLen` is signed; −1 marks a tombstone with no value bytes, the same
//! way a null key is encoded elsewhere. The clock dimension is carried once
//! in the enclosing batch header, not per event.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use krati_clock::{Clock, CLOCK_COORDINATE_SIZE};
use krati_core::{Scn, SourceId};

/// A change event: `(source, key, value, clock)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The writer source that produced this event.
    pub source: SourceId,
    /// The written key.
    pub key: Bytes,
    /// The written value, or `None` for a delete tombstone.
    pub value: Option<Bytes>,
    /// The writer's clock at the moment of the write.
    pub clock: Clock,
}

impl Event {
    /// Creates a put event.
    #[must_use]
    pub fn new(source: SourceId, key: Bytes, value: Bytes, clock: Clock) -> Self {
        Self {
            source,
            key,
            value: Some(value),
            clock,
        }
    }

    /// Creates a delete tombstone.
    #[must_use]
    pub const fn tombstone(source: SourceId, key: Bytes, clock: Clock) -> Self {
        Self {
            source,
            key,
            value: None,
            clock,
        }
    }

    /// Returns true if this event records a delete.
    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Returns the writer's sequence number at the given clock coordinate.
    #[must_use]
    pub fn scn(&self, coordinate: usize) -> Scn {
        Scn::new(self.clock.coordinate(coordinate))
    }

    /// Returns the encoded size of this event in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        let value_len = self.value.as_ref().map_or(0, Bytes::len);
        4 + self.source.as_str().len()
            + 4
            + self.key.len()
            + 4
            + value_len
            + self.clock.dimension() as usize * CLOCK_COORDINATE_SIZE
    }

    /// Encodes the event to bytes.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)] // Sizes bounded by limits.
    pub fn encode(&self, buf: &mut BytesMut) {
        let source = self.source.as_str().as_bytes();
        buf.put_u32_le(source.len() as u32);
        buf.put_slice(source);

        buf.put_u32_le(self.key.len() as u32);
        buf.put_slice(&self.key);

        match &self.value {
            Some(value) => {
                buf.put_i32_le(value.len() as i32);
                buf.put_slice(value);
            }
            None => buf.put_i32_le(-1),
        }

        self.clock.encode(buf);
    }

    /// Decodes an event from bytes.
    ///
    /// The clock dimension comes from the enclosing batch header.
    /// Returns `None` if the buffer is too short or malformed.
    #[allow(clippy::cast_sign_loss)] // value_len checked non-negative before cast.
    pub fn decode(buf: &mut impl Buf, clock_dimension: u32) -> Option<Self> {
        if buf.remaining() < 4 {
            return None;
        }
        let source_len = buf.get_u32_le() as usize;
        if buf.remaining() < source_len {
            return None;
        }
        let source_bytes = buf.copy_to_bytes(source_len);
        let source = SourceId::new(std::str::from_utf8(&source_bytes).ok()?);

        if buf.remaining() < 4 {
            return None;
        }
        let key_len = buf.get_u32_le() as usize;
        if buf.remaining() < key_len {
            return None;
        }
        let key = buf.copy_to_bytes(key_len);

        if buf.remaining() < 4 {
            return None;
        }
        let value_len = buf.get_i32_le();
        let value = if value_len < 0 {
            None
        } else {
            if buf.remaining() < value_len as usize {
                return None;
            }
            Some(buf.copy_to_bytes(value_len as usize))
        };

        let clock_bytes = clock_dimension as usize * CLOCK_COORDINATE_SIZE;
        if buf.remaining() < clock_bytes {
            return None;
        }
        let clock_raw = buf.copy_to_bytes(clock_bytes);
        let clock = Clock::decode(&clock_raw, clock_dimension).ok()?;

        Some(Self {
            source,
            key,
            value,
            clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_roundtrip() {
        let event = Event::new(
            SourceId::new("source1"),
            Bytes::from_static(b"key-1"),
            Bytes::from_static(b"value-1"),
            Clock::new(vec![7, 3]),
        );

        let mut buf = BytesMut::new();
        event.encode(&mut buf);
        assert_eq!(buf.len(), event.encoded_size());

        let decoded = Event::decode(&mut buf.freeze(), 2).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_tombstone_roundtrip() {
        let event = Event::tombstone(
            SourceId::new("source1"),
            Bytes::from_static(b"gone"),
            Clock::new(vec![9]),
        );
        assert!(event.is_tombstone());

        let mut buf = BytesMut::new();
        event.encode(&mut buf);

        let decoded = Event::decode(&mut buf.freeze(), 1).unwrap();
        assert!(decoded.is_tombstone());
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_scn_reads_one_coordinate() {
        let event = Event::new(
            SourceId::new("s2"),
            Bytes::from_static(b"k"),
            Bytes::from_static(b"v"),
            Clock::new(vec![4, 11]),
        );
        assert_eq!(event.scn(0), Scn::new(4));
        assert_eq!(event.scn(1), Scn::new(11));
    }

    #[test]
    fn test_decode_truncated_returns_none() {
        let event = Event::new(
            SourceId::new("s"),
            Bytes::from_static(b"k"),
            Bytes::from_static(b"v"),
            Clock::new(vec![1]),
        );
        let mut buf = BytesMut::new();
        event.encode(&mut buf);
        buf.truncate(buf.len() - 3);

        assert!(Event::decode(&mut buf.freeze(), 1).is_none());
    }
}
