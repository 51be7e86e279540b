//! The composite retention store reader.
//!
//! Fans in several single-source readers behind one cursor. Per-source
//! order is preserved because each pull drains one child in its own order;
//! cross-source order is not globally linearized, and none is implied when
//! clocks are incomparable. Scheduling is round-robin: the fairness cursor
//! travels inside the composite position, so no child is starved across
//! calls even though each call returns at most one child's pull.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use krati_clock::{Clock, ClockError};
use krati_core::SourceId;
use krati_store::{DataStore, Storage};

use crate::error::{RetentionError, RetentionResult};
use crate::event::Event;
use crate::position::{CompositePosition, Position};
use crate::reader::{RetentionStoreReader, SimpleRetentionStoreReader};

/// Fan-in over single-source readers with distinct sources.
pub struct CompositeRetentionStoreReader<D, S>
where
    D: DataStore,
    S: Storage,
{
    /// The constituent readers, in scheduling order.
    readers: Vec<SimpleRetentionStoreReader<D, S>>,
    /// Union of the children's retention source orders.
    union_sources: Vec<SourceId>,
    /// Source name to union coordinate index.
    union_index: HashMap<SourceId, usize>,
}

impl<D, S> CompositeRetentionStoreReader<D, S>
where
    D: DataStore,
    S: Storage,
{
    /// Creates a composite reader.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the list is empty or two readers share a
    /// source.
    pub fn new(readers: Vec<SimpleRetentionStoreReader<D, S>>) -> RetentionResult<Self> {
        if readers.is_empty() {
            return Err(RetentionError::InvalidConfig {
                reason: "composite reader needs at least one child",
            });
        }

        let mut union_sources = Vec::new();
        let mut union_index = HashMap::new();
        let mut reader_sources = std::collections::HashSet::new();

        for reader in &readers {
            if !reader_sources.insert(reader.source().clone()) {
                return Err(RetentionError::InvalidConfig {
                    reason: "composite readers must have distinct sources",
                });
            }
            for source in reader.retention_sources() {
                if !union_index.contains_key(source) {
                    union_index.insert(source.clone(), union_sources.len());
                    union_sources.push(source.clone());
                }
            }
        }

        Ok(Self {
            readers,
            union_sources,
            union_index,
        })
    }

    /// Returns the union source order the global clock is expressed in.
    #[must_use]
    pub fn union_sources(&self) -> &[SourceId] {
        &self.union_sources
    }

    /// Point lookup aggregated by source: each child that currently holds
    /// the key contributes its value.
    ///
    /// Children are not sampled atomically; this is a per-child snapshot.
    ///
    /// # Errors
    /// Returns the first store error.
    pub async fn lookup(&self, key: &[u8]) -> RetentionResult<HashMap<SourceId, Bytes>> {
        let mut values = HashMap::new();
        for reader in &self.readers {
            if let Some(value) = reader.lookup(key).await? {
                values.insert(reader.source().clone(), value);
            }
        }
        Ok(values)
    }

    /// Projects a union-order clock onto one child's retention order.
    fn project(&self, clock: &Clock, reader: &SimpleRetentionStoreReader<D, S>) -> Clock {
        if clock.dimension() == 0 {
            return Clock::ZERO;
        }
        let coordinates = reader
            .retention_sources()
            .iter()
            .map(|source| clock.coordinate(self.union_index[source]))
            .collect();
        Clock::new(coordinates)
    }

    /// Computes the global clock: the per-coordinate maximum of the
    /// children's position clocks, in union order.
    fn global_clock(&self, children: &[Position]) -> Clock {
        let mut coordinates = vec![0u64; self.union_sources.len()];
        for (reader, position) in self.readers.iter().zip(children) {
            for (index, source) in reader.retention_sources().iter().enumerate() {
                let value = position.clock().coordinate(index);
                let union = self.union_index[source];
                if value > coordinates[union] {
                    coordinates[union] = value;
                }
            }
        }
        Clock::new(coordinates)
    }
}

#[async_trait]
impl<D, S> RetentionStoreReader for CompositeRetentionStoreReader<D, S>
where
    D: DataStore,
    S: Storage,
{
    type Pos = CompositePosition;

    fn sources(&self) -> Vec<SourceId> {
        self.readers
            .iter()
            .map(|reader| reader.source().clone())
            .collect()
    }

    async fn position_at(&self, clock: &Clock) -> RetentionResult<CompositePosition> {
        #[allow(clippy::cast_possible_truncation)] // Bounded by CLOCK_SOURCES_COUNT_MAX.
        let union_dimension = self.union_sources.len() as u32;
        if clock.dimension() != 0 && clock.dimension() != union_dimension {
            return Err(RetentionError::Clock(ClockError::DimensionMismatch {
                left: clock.dimension(),
                right: union_dimension,
            }));
        }

        let mut children = Vec::with_capacity(self.readers.len());
        for reader in &self.readers {
            let projected = self.project(clock, reader);
            children.push(reader.position_at(&projected).await?);
        }

        let global = self.global_clock(&children);
        Ok(CompositePosition::new(children, global, 0))
    }

    /// Pulls from the next child with data, in fair round-robin order.
    ///
    /// Children probed on the way to the producing child still have their
    /// sub-positions updated, so an idle child completes its
    /// indexed-to-streaming transition instead of pinning the composite in
    /// the indexed state forever.
    async fn read(
        &self,
        position: &CompositePosition,
        out: &mut Vec<Event>,
    ) -> RetentionResult<CompositePosition> {
        if position.children().len() != self.readers.len() {
            return Err(RetentionError::InvalidPosition {
                reason: "child count does not match reader count",
            });
        }

        let count = self.readers.len();
        let mut children = position.children().to_vec();
        let mut cursor = position.cursor() as usize % count;

        for probe in 0..count {
            let index = (position.cursor() as usize + probe) % count;
            let before = out.len();
            let next = self.readers[index].read(&children[index], out).await?;
            children[index] = next;
            if out.len() > before {
                cursor = (index + 1) % count;
                break;
            }
        }

        let global = self.global_clock(&children);
        #[allow(clippy::cast_possible_truncation)] // Bounded by reader count.
        let cursor = cursor as u32;
        Ok(CompositePosition::new(children, global, cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionConfig;
    use crate::policy::RetentionPolicyOnSize;
    use crate::retention::SimpleRetention;
    use crate::writer::SimpleRetentionStoreWriter;
    use krati_clock::{SimulatedWaterMarkStore, SourceWaterMarksClock};
    use krati_core::{RetentionId, Scn};
    use krati_store::{MemoryStore, TokioStorage};
    use std::sync::Arc;

    type TestWriter =
        SimpleRetentionStoreWriter<MemoryStore, TokioStorage, SimulatedWaterMarkStore>;
    type TestReader = SimpleRetentionStoreReader<MemoryStore, TokioStorage>;

    async fn substore(dir: &std::path::Path, id: u64, source: &str) -> (TestWriter, TestReader) {
        let source = SourceId::new(source);
        let config = RetentionConfig::new(RetentionId::new(id), dir, vec![source.clone()])
            .with_batch_size(10)
            .with_policy(Arc::new(RetentionPolicyOnSize::new(3)))
            .with_segment_file_size_mb(16);

        let retention = Arc::new(
            SimpleRetention::open(TokioStorage::new(), config)
                .await
                .unwrap(),
        );
        let store = Arc::new(MemoryStore::new(id));
        let clock = Arc::new(
            SourceWaterMarksClock::open(vec![source.clone()], SimulatedWaterMarkStore::new())
                .await
                .unwrap(),
        );

        let writer = SimpleRetentionStoreWriter::new(
            source.clone(),
            retention.clone(),
            store.clone(),
            clock,
        )
        .unwrap();
        let reader = SimpleRetentionStoreReader::new(source, retention, store).unwrap();
        (writer, reader)
    }

    #[tokio::test]
    async fn test_rejects_duplicate_sources() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (_w1, r1) = substore(temp_dir.path(), 1, "s1").await;
        let r1_again = r1.clone();

        let result = CompositeRetentionStoreReader::new(vec![r1, r1_again]);
        assert!(matches!(result, Err(RetentionError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_union_sources_follow_reader_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (_w1, r1) = substore(temp_dir.path(), 1, "s1").await;
        let (_w2, r2) = substore(temp_dir.path(), 2, "s2").await;

        let composite = CompositeRetentionStoreReader::new(vec![r1, r2]).unwrap();
        assert_eq!(
            composite.union_sources(),
            &[SourceId::new("s1"), SourceId::new("s2")]
        );
    }

    #[tokio::test]
    async fn test_fan_in_preserves_per_source_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (w1, r1) = substore(temp_dir.path(), 1, "s1").await;
        let (w2, r2) = substore(temp_dir.path(), 2, "s2").await;

        for scn in 1..=25u64 {
            w1.put(
                Bytes::from(format!("a{scn}")),
                Bytes::from(format!("v{scn}")),
                Scn::new(scn),
            )
            .await
            .unwrap();
            w2.put(
                Bytes::from(format!("b{scn}")),
                Bytes::from(format!("v{scn}")),
                Scn::new(scn),
            )
            .await
            .unwrap();
        }

        let composite = CompositeRetentionStoreReader::new(vec![r1, r2]).unwrap();
        let mut out = Vec::new();
        let mut position = composite.position_at(&Clock::ZERO).await.unwrap();
        loop {
            let before = out.len();
            position = composite.read(&position, &mut out).await.unwrap();
            if out.len() == before {
                break;
            }
        }

        assert_eq!(out.len(), 50);
        assert!(!position.is_indexed());

        // Events from each source arrive in that source's writer order.
        for source in ["s1", "s2"] {
            let source = SourceId::new(source);
            let scns: Vec<u64> = out
                .iter()
                .filter(|e| e.source == source)
                .map(|e| e.clock.coordinate(0))
                .collect();
            assert_eq!(scns.len(), 25);
            assert!(scns.windows(2).all(|pair| pair[0] <= pair[1]));
        }
    }

    #[tokio::test]
    async fn test_global_clock_tracks_both_children() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (w1, r1) = substore(temp_dir.path(), 1, "s1").await;
        let (w2, r2) = substore(temp_dir.path(), 2, "s2").await;

        for scn in 1..=5u64 {
            w1.put(Bytes::from(format!("a{scn}")), Bytes::from_static(b"v"), Scn::new(scn))
                .await
                .unwrap();
            w2.put(Bytes::from(format!("b{scn}")), Bytes::from_static(b"v"), Scn::new(scn))
                .await
                .unwrap();
        }

        let composite = CompositeRetentionStoreReader::new(vec![r1, r2]).unwrap();
        let mut out = Vec::new();
        let mut position = composite.position_at(&Clock::ZERO).await.unwrap();
        loop {
            let before = out.len();
            position = composite.read(&position, &mut out).await.unwrap();
            if out.len() == before {
                break;
            }
        }

        assert_eq!(position.clock().coordinate(0), 5);
        assert_eq!(position.clock().coordinate(1), 5);
    }

    #[tokio::test]
    async fn test_lookup_aggregates_by_source() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (w1, r1) = substore(temp_dir.path(), 1, "s1").await;
        let (w2, r2) = substore(temp_dir.path(), 2, "s2").await;

        w1.put(
            Bytes::from_static(b"shared"),
            Bytes::from_static(b"from-s1"),
            Scn::new(1),
        )
        .await
        .unwrap();
        w2.put(
            Bytes::from_static(b"shared"),
            Bytes::from_static(b"from-s2"),
            Scn::new(1),
        )
        .await
        .unwrap();
        w1.put(
            Bytes::from_static(b"only-s1"),
            Bytes::from_static(b"x"),
            Scn::new(2),
        )
        .await
        .unwrap();

        let composite = CompositeRetentionStoreReader::new(vec![r1, r2]).unwrap();

        let shared = composite.lookup(b"shared").await.unwrap();
        assert_eq!(shared.len(), 2);
        assert_eq!(
            shared[&SourceId::new("s1")],
            Bytes::from_static(b"from-s1")
        );
        assert_eq!(
            shared[&SourceId::new("s2")],
            Bytes::from_static(b"from-s2")
        );

        let only = composite.lookup(b"only-s1").await.unwrap();
        assert_eq!(only.len(), 1);
        assert!(only.contains_key(&SourceId::new("s1")));
    }
}
