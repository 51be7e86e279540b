//! Single-source retention store readers.
//!
//! A reader couples one retention with the key-value store it shadows:
//! `position_at`/`read` replay and then tail the change history, and
//! `lookup` is a point read of the latest value, bypassing the retention.
//!
//! The [`RetentionStoreReader`] trait is the one replay capability both
//! the single-source reader and the composite fan-in implement; the
//! composite is just one implementation among many.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use krati_clock::{Clock, ClockError};
use krati_core::SourceId;
use krati_store::{DataStore, Storage};

use crate::error::{RetentionError, RetentionResult};
use crate::event::Event;
use crate::position::Position;
use crate::retention::SimpleRetention;

/// The replay capability: resolve a clock to a cursor, then pull events.
#[async_trait]
pub trait RetentionStoreReader: Send + Sync {
    /// The cursor type this reader advances.
    type Pos;

    /// Returns the sources this reader delivers events for.
    fn sources(&self) -> Vec<SourceId>;

    /// Resolves a clock to a replay cursor.
    async fn position_at(&self, clock: &Clock) -> RetentionResult<Self::Pos>;

    /// Pulls events into `out`, returning the advanced cursor. An empty
    /// pull with an unchanged cursor means "no new data yet"; reads never
    /// block waiting for events.
    async fn read(&self, position: &Self::Pos, out: &mut Vec<Event>) -> RetentionResult<Self::Pos>;
}

/// Replays and tails one source's events, with point reads from the store.
pub struct SimpleRetentionStoreReader<D, S>
where
    D: DataStore,
    S: Storage,
{
    /// The source this reader follows.
    source: SourceId,
    /// The change history.
    retention: Arc<SimpleRetention<S>>,
    /// The latest-value store.
    store: Arc<D>,
    /// Events pulled per `read` call.
    batch_size: usize,
}

impl<D, S> SimpleRetentionStoreReader<D, S>
where
    D: DataStore,
    S: Storage,
{
    /// Creates a reader for one source of a retention.
    ///
    /// # Errors
    /// Returns `UnknownSource` if the retention does not carry the source.
    pub fn new(
        source: SourceId,
        retention: Arc<SimpleRetention<S>>,
        store: Arc<D>,
    ) -> RetentionResult<Self> {
        let batch_size = retention.config().batch_size as usize;
        if !retention.sources().contains(&source) {
            return Err(RetentionError::Clock(ClockError::UnknownSource {
                source_id: source,
            }));
        }

        Ok(Self {
            source,
            retention,
            store,
            batch_size,
        })
    }

    /// Returns the reader's source.
    #[must_use]
    pub const fn source(&self) -> &SourceId {
        &self.source
    }

    /// Returns the source order of the underlying retention.
    #[must_use]
    pub fn retention_sources(&self) -> &[SourceId] {
        self.retention.sources()
    }

    /// Point read of the latest value for a key, bypassing the retention.
    ///
    /// # Errors
    /// Returns store errors.
    pub async fn lookup(&self, key: &[u8]) -> RetentionResult<Option<Bytes>> {
        Ok(self.store.get(key).await?)
    }
}

impl<D, S> Clone for SimpleRetentionStoreReader<D, S>
where
    D: DataStore,
    S: Storage,
{
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            retention: self.retention.clone(),
            store: self.store.clone(),
            batch_size: self.batch_size,
        }
    }
}

#[async_trait]
impl<D, S> RetentionStoreReader for SimpleRetentionStoreReader<D, S>
where
    D: DataStore,
    S: Storage,
{
    type Pos = Position;

    fn sources(&self) -> Vec<SourceId> {
        vec![self.source.clone()]
    }

    async fn position_at(&self, clock: &Clock) -> RetentionResult<Position> {
        self.retention.position_at(&self.source, clock)
    }

    async fn read(&self, position: &Position, out: &mut Vec<Event>) -> RetentionResult<Position> {
        self.retention.read(position, self.batch_size, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionConfig;
    use crate::policy::RetentionPolicyOnSize;
    use crate::writer::SimpleRetentionStoreWriter;
    use krati_clock::{SimulatedWaterMarkStore, SourceWaterMarksClock};
    use krati_core::{RetentionId, Scn};
    use krati_store::{MemoryStore, TokioStorage};

    async fn setup(
        dir: &std::path::Path,
    ) -> (
        SimpleRetentionStoreWriter<MemoryStore, TokioStorage, SimulatedWaterMarkStore>,
        SimpleRetentionStoreReader<MemoryStore, TokioStorage>,
    ) {
        let source = SourceId::new("source1");
        let config = RetentionConfig::new(RetentionId::new(1), dir, vec![source.clone()])
            .with_batch_size(10)
            .with_policy(Arc::new(RetentionPolicyOnSize::new(3)))
            .with_segment_file_size_mb(16);

        let retention = Arc::new(
            SimpleRetention::open(TokioStorage::new(), config)
                .await
                .unwrap(),
        );
        let store = Arc::new(MemoryStore::new(42));
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
    async fn test_replay_is_complete_and_ordered() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (writer, reader) = setup(temp_dir.path()).await;

        for scn in 1..=23u64 {
            writer
                .put(
                    Bytes::from(format!("k{scn}")),
                    Bytes::from(format!("v{scn}")),
                    Scn::new(scn),
                )
                .await
                .unwrap();
        }

        let mut out = Vec::new();
        let mut position = reader.position_at(&Clock::ZERO).await.unwrap();
        loop {
            let before = out.len();
            position = reader.read(&position, &mut out).await.unwrap();
            if out.len() == before {
                break;
            }
        }

        assert_eq!(out.len(), 23);
        for (index, event) in out.iter().enumerate() {
            assert_eq!(event.scn(0), Scn::new(index as u64 + 1));
        }
        assert!(!position.is_indexed());
    }

    #[tokio::test]
    async fn test_lookup_bypasses_retention() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (writer, reader) = setup(temp_dir.path()).await;

        writer
            .put(
                Bytes::from_static(b"k"),
                Bytes::from_static(b"v"),
                Scn::new(1),
            )
            .await
            .unwrap();

        assert_eq!(
            reader.lookup(b"k").await.unwrap(),
            Some(Bytes::from_static(b"v"))
        );
        assert_eq!(reader.lookup(b"missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_source_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (_writer, reader) = setup(temp_dir.path()).await;

        let result = SimpleRetentionStoreReader::new(
            SourceId::new("ghost"),
            reader.retention.clone(),
            reader.store.clone(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_streaming_tail_after_catch_up() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (writer, reader) = setup(temp_dir.path()).await;

        for scn in 1..=15u64 {
            writer
                .put(
                    Bytes::from(format!("k{scn}")),
                    Bytes::from(format!("v{scn}")),
                    Scn::new(scn),
                )
                .await
                .unwrap();
        }

        let mut out = Vec::new();
        let mut position = reader.position_at(&Clock::ZERO).await.unwrap();
        loop {
            let before = out.len();
            position = reader.read(&position, &mut out).await.unwrap();
            if out.len() == before {
                break;
            }
        }
        out.clear();

        // New writes stream through the caught-up position.
        for scn in 16..=18u64 {
            writer
                .put(
                    Bytes::from(format!("k{scn}")),
                    Bytes::from(format!("v{scn}")),
                    Scn::new(scn),
                )
                .await
                .unwrap();
        }

        let next = reader.read(&position, &mut out).await.unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].scn(0), Scn::new(16));

        // And nothing more after that.
        out.clear();
        let after = reader.read(&next, &mut out).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(after, next);
    }
}
