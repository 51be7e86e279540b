//! Krati Clock - Multi-source logical clocks and persisted watermarks.
//!
//! A [`Clock`] is a vector of sequence numbers, one coordinate per named
//! source in a fixed, agreed order. Clocks from independent sources are
//! only partially ordered: two clocks may be incomparable, and that is the
//! property that makes multi-source replay non-trivial.
//!
//! A [`SourceWaterMarksClock`] pairs the in-memory clock with durable
//! per-source watermarks: the high watermark advances on every write, the
//! low watermark is the last value flushed to disk, and on restart the low
//! watermark is authoritative.
//!
//! # Example
//!
//! ```ignore
//! use krati_clock::{SourceWaterMarksClock, FileWaterMarkStore};
//! use krati_core::{Scn, SourceId};
//!
//! let store = FileWaterMarkStore::new("/data/sourceWaterMarks.scn");
//! let clock = SourceWaterMarksClock::open(vec![SourceId::new("s1")], store).await?;
//!
//! clock.advance(&SourceId::new("s1"), Scn::new(42))?;
//! clock.flush().await?; // low watermark now durable at 42
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod clock;
mod error;
mod storage;
mod watermarks;

pub use clock::{Clock, ClockOrdering, ClockSerializer, CLOCK_COORDINATE_SIZE};
pub use error::{ClockError, ClockResult};
pub use storage::{FileWaterMarkStore, SimulatedWaterMarkStore, WaterMarkStore};
pub use watermarks::{SourceWaterMarksClock, WaterMark};
