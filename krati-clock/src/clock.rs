//! The multi-source logical clock.
//!
//! A clock is a vector of sequence numbers, one coordinate per source in a
//! fixed order agreed by writer and reader. Comparison is coordinate-wise:
//! `A <= B` iff every coordinate of A is `<=` the matching coordinate of B.
//! Clocks where neither side dominates are *concurrent*, and concurrency is
//! expected, not an error.
//!
//! # Wire Format
//!
//! One unsigned 64-bit little-endian integer per source, in source order:
//!
//! ```text
//! +----------+----------+-----+----------+
//! | coord 0  | coord 1  | ... | coord N-1|
//! | (8 bytes)| (8 bytes)|     | (8 bytes)|
//! +----------+----------+-----+----------+
//! ```
//!
//! Compatibility requires source-order agreement between both ends.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use krati_core::limits::CLOCK_SOURCES_COUNT_MAX;
use krati_core::{CodecError, Serializer};

use crate::error::{ClockError, ClockResult};

/// Encoded size of one clock coordinate in bytes.
pub const CLOCK_COORDINATE_SIZE: usize = 8;

/// Outcome of comparing two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// Every coordinate is `<=` and at least one is `<`.
    Before,
    /// All coordinates are equal.
    Equal,
    /// Every coordinate is `>=` and at least one is `>`.
    After,
    /// Neither clock dominates the other.
    Concurrent,
}

/// A vector of per-source sequence numbers.
///
/// [`Clock::ZERO`] is the empty vector and the universal floor: it compares
/// against a clock of any dimension as the all-zero vector of that
/// dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clock(Vec<u64>);

impl Clock {
    /// The all-zero clock, the universal floor.
    pub const ZERO: Self = Self(Vec::new());

    /// Creates a clock from raw coordinates.
    ///
    /// # Panics
    /// Panics if the number of coordinates exceeds
    /// [`CLOCK_SOURCES_COUNT_MAX`].
    #[must_use]
    pub fn new(coordinates: Vec<u64>) -> Self {
        assert!(
            coordinates.len() <= CLOCK_SOURCES_COUNT_MAX as usize,
            "too many clock coordinates"
        );
        Self(coordinates)
    }

    /// Returns the number of coordinates.
    ///
    /// [`Clock::ZERO`] has dimension 0 and adapts to any dimension on
    /// comparison.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Bounded by CLOCK_SOURCES_COUNT_MAX.
    pub fn dimension(&self) -> u32 {
        self.0.len() as u32
    }

    /// Returns true if every coordinate is zero (vacuously true for ZERO).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    /// Returns the coordinate at `index`.
    ///
    /// The ZERO clock returns 0 for any index.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds for a non-ZERO clock.
    #[must_use]
    pub fn coordinate(&self, index: usize) -> u64 {
        if self.0.is_empty() {
            return 0;
        }
        assert!(index < self.0.len(), "clock coordinate out of bounds");
        self.0[index]
    }

    /// Returns a copy of this clock with one coordinate replaced.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn with_coordinate(&self, index: usize, value: u64) -> Self {
        assert!(index < self.0.len(), "clock coordinate out of bounds");
        let mut coordinates = self.0.clone();
        coordinates[index] = value;
        Self(coordinates)
    }

    /// Compares two clocks coordinate-wise.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` if both clocks are non-ZERO with
    /// different dimensions. Concurrency is never fabricated from a
    /// dimension error.
    pub fn compare(&self, other: &Self) -> ClockResult<ClockOrdering> {
        let dimension = match (self.0.is_empty(), other.0.is_empty()) {
            (true, true) => return Ok(ClockOrdering::Equal),
            (true, false) => other.0.len(),
            (false, true) => self.0.len(),
            (false, false) => {
                if self.0.len() != other.0.len() {
                    return Err(ClockError::DimensionMismatch {
                        left: self.dimension(),
                        right: other.dimension(),
                    });
                }
                self.0.len()
            }
        };

        let mut less = false;
        let mut greater = false;
        for index in 0..dimension {
            let a = self.coordinate(index);
            let b = other.coordinate(index);
            if a < b {
                less = true;
            } else if a > b {
                greater = true;
            }
        }

        Ok(match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        })
    }

    /// Returns true if this clock is `>=` the other on every coordinate.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` as [`Clock::compare`] does.
    pub fn dominates(&self, other: &Self) -> ClockResult<bool> {
        Ok(matches!(
            self.compare(other)?,
            ClockOrdering::After | ClockOrdering::Equal
        ))
    }

    /// Encodes the clock to bytes, one `u64` per coordinate.
    pub fn encode(&self, buf: &mut BytesMut) {
        for &coordinate in &self.0 {
            buf.put_u64_le(coordinate);
        }
    }

    /// Decodes a clock for a known source order.
    ///
    /// # Errors
    /// Returns `InvalidEncoding` if the byte length does not equal
    /// `8 * source_count`.
    pub fn decode(bytes: &[u8], source_count: u32) -> ClockResult<Self> {
        let expected = source_count as usize * CLOCK_COORDINATE_SIZE;
        if bytes.len() != expected {
            return Err(ClockError::InvalidEncoding {
                length: bytes.len(),
                source_count,
            });
        }

        let mut buf = bytes;
        let mut coordinates = Vec::with_capacity(source_count as usize);
        for _ in 0..source_count {
            coordinates.push(buf.get_u64_le());
        }
        Ok(Self(coordinates))
    }
}

impl std::fmt::Display for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "clock(ZERO)");
        }
        write!(f, "clock(")?;
        for (index, coordinate) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            write!(f, "{coordinate}")?;
        }
        write!(f, ")")
    }
}

/// Codec for clocks over a fixed source order.
///
/// The encoded size is always `8 * source_count` bytes; the ZERO clock
/// encodes as all zeros of that width so both ends stay fixed-size.
#[derive(Debug, Clone, Copy)]
pub struct ClockSerializer {
    /// Number of sources in the agreed order.
    source_count: u32,
}

impl ClockSerializer {
    /// Creates a codec for the given source count.
    #[must_use]
    pub const fn new(source_count: u32) -> Self {
        Self { source_count }
    }

    /// Returns the fixed encoded size in bytes.
    #[must_use]
    pub const fn encoded_size(&self) -> usize {
        self.source_count as usize * CLOCK_COORDINATE_SIZE
    }
}

impl Serializer<Clock> for ClockSerializer {
    fn serialize(&self, value: &Clock) -> Result<Bytes, CodecError> {
        if value.dimension() != 0 && value.dimension() != self.source_count {
            return Err(CodecError::Malformed {
                type_name: "Clock",
                message: format!(
                    "dimension {} does not match source count {}",
                    value.dimension(),
                    self.source_count
                ),
            });
        }

        let mut buf = BytesMut::with_capacity(self.encoded_size());
        if value.dimension() == 0 {
            for _ in 0..self.source_count {
                buf.put_u64_le(0);
            }
        } else {
            value.encode(&mut buf);
        }
        Ok(buf.freeze())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Clock, CodecError> {
        Clock::decode(bytes, self.source_count).map_err(|e| CodecError::Malformed {
            type_name: "Clock",
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_universal_floor() {
        let clock = Clock::new(vec![3, 7]);

        assert_eq!(
            Clock::ZERO.compare(&clock).unwrap(),
            ClockOrdering::Before
        );
        assert_eq!(clock.compare(&Clock::ZERO).unwrap(), ClockOrdering::After);
        assert_eq!(
            Clock::ZERO.compare(&Clock::ZERO).unwrap(),
            ClockOrdering::Equal
        );
    }

    #[test]
    fn test_zero_equals_explicit_zeros() {
        let zeros = Clock::new(vec![0, 0, 0]);
        assert_eq!(Clock::ZERO.compare(&zeros).unwrap(), ClockOrdering::Equal);
        assert!(zeros.is_zero());
    }

    #[test]
    fn test_dominance() {
        let a = Clock::new(vec![1, 2]);
        let b = Clock::new(vec![2, 2]);

        assert_eq!(a.compare(&b).unwrap(), ClockOrdering::Before);
        assert_eq!(b.compare(&a).unwrap(), ClockOrdering::After);
        assert!(b.dominates(&a).unwrap());
        assert!(!a.dominates(&b).unwrap());
        assert!(a.dominates(&a).unwrap());
    }

    #[test]
    fn test_concurrent_clocks() {
        let a = Clock::new(vec![5, 1]);
        let b = Clock::new(vec![1, 5]);

        assert_eq!(a.compare(&b).unwrap(), ClockOrdering::Concurrent);
        assert_eq!(b.compare(&a).unwrap(), ClockOrdering::Concurrent);
        assert!(!a.dominates(&b).unwrap());
        assert!(!b.dominates(&a).unwrap());
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let a = Clock::new(vec![1]);
        let b = Clock::new(vec![1, 2]);
        assert!(matches!(
            a.compare(&b),
            Err(ClockError::DimensionMismatch { left: 1, right: 2 })
        ));
    }

    #[test]
    fn test_with_coordinate() {
        let clock = Clock::new(vec![1, 2, 3]);
        let bumped = clock.with_coordinate(1, 9);

        assert_eq!(bumped.coordinate(1), 9);
        assert_eq!(clock.coordinate(1), 2); // Original untouched.
        assert_eq!(bumped.compare(&clock).unwrap(), ClockOrdering::After);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let clock = Clock::new(vec![10, 20, 30]);

        let mut buf = BytesMut::new();
        clock.encode(&mut buf);
        assert_eq!(buf.len(), 3 * CLOCK_COORDINATE_SIZE);

        let decoded = Clock::decode(&buf, 3).unwrap();
        assert_eq!(decoded, clock);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let result = Clock::decode(&[0u8; 12], 2);
        assert!(matches!(
            result,
            Err(ClockError::InvalidEncoding {
                length: 12,
                source_count: 2
            })
        ));
    }

    #[test]
    fn test_serializer_roundtrip() {
        let codec = ClockSerializer::new(2);
        let clock = Clock::new(vec![7, 9]);

        let bytes = codec.serialize(&clock).unwrap();
        assert_eq!(bytes.len(), codec.encoded_size());

        let decoded = codec.deserialize(&bytes).unwrap();
        assert_eq!(decoded, clock);
    }

    #[test]
    fn test_serializer_widens_zero() {
        let codec = ClockSerializer::new(3);
        let bytes = codec.serialize(&Clock::ZERO).unwrap();
        assert_eq!(bytes.len(), 24);

        let decoded = codec.deserialize(&bytes).unwrap();
        assert!(decoded.is_zero());
        assert_eq!(decoded.dimension(), 3);
    }

    #[test]
    fn test_serializer_rejects_wrong_dimension() {
        let codec = ClockSerializer::new(2);
        let clock = Clock::new(vec![1, 2, 3]);
        assert!(codec.serialize(&clock).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Clock::ZERO), "clock(ZERO)");
        assert_eq!(format!("{}", Clock::new(vec![1, 2])), "clock(1,2)");
    }
}
