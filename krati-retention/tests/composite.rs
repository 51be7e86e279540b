//! End-to-end composite reader scenarios: bootstrap replay across several
//! retentions, the streaming transition, and point lookups by source.

use std::sync::Arc;

use bytes::Bytes;
use krati_clock::{Clock, SimulatedWaterMarkStore, SourceWaterMarksClock};
use krati_core::{RetentionId, Scn, SourceId};
use krati_retention::{
    CompositePosition, CompositeRetentionStoreReader, Event, RetentionConfig,
    RetentionPolicyOnSize, RetentionStoreReader, SimpleRetention, SimpleRetentionStoreReader,
    SimpleRetentionStoreWriter,
};
use krati_store::{MemoryStore, TokioStorage};

type Writer = SimpleRetentionStoreWriter<MemoryStore, TokioStorage, SimulatedWaterMarkStore>;
type Reader = SimpleRetentionStoreReader<MemoryStore, TokioStorage>;
type Composite = CompositeRetentionStoreReader<MemoryStore, TokioStorage>;

const EVENT_BATCH_SIZE: u32 = 100;
const NUM_RETENTION_BATCHES: u32 = 3;

async fn create_retention(
    dir: &std::path::Path,
    id: u64,
    sources: &[&str],
) -> Arc<SimpleRetention<TokioStorage>> {
    let config = RetentionConfig::new(
        RetentionId::new(id),
        dir,
        sources.iter().map(SourceId::new).collect(),
    )
    .with_batch_size(EVENT_BATCH_SIZE)
    .with_policy(Arc::new(RetentionPolicyOnSize::new(NUM_RETENTION_BATCHES)))
    .with_segment_file_size_mb(16);

    Arc::new(
        SimpleRetention::open(TokioStorage::new(), config)
            .await
            .unwrap(),
    )
}

async fn create_clock(sources: &[&str]) -> Arc<SourceWaterMarksClock<SimulatedWaterMarkStore>> {
    Arc::new(
        SourceWaterMarksClock::open(
            sources.iter().map(SourceId::new).collect(),
            SimulatedWaterMarkStore::new(),
        )
        .await
        .unwrap(),
    )
}

fn create_writer(
    source: &str,
    retention: &Arc<SimpleRetention<TokioStorage>>,
    store: &Arc<MemoryStore>,
    clock: &Arc<SourceWaterMarksClock<SimulatedWaterMarkStore>>,
) -> Writer {
    SimpleRetentionStoreWriter::new(
        SourceId::new(source),
        retention.clone(),
        store.clone(),
        clock.clone(),
    )
    .unwrap()
}

fn create_reader(
    source: &str,
    retention: &Arc<SimpleRetention<TokioStorage>>,
    store: &Arc<MemoryStore>,
) -> Reader {
    SimpleRetentionStoreReader::new(SourceId::new(source), retention.clone(), store.clone())
        .unwrap()
}

fn next_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn next_value() -> String {
    format!("value.{}", uuid::Uuid::new_v4())
}

/// Pulls until a read returns nothing, collecting every event.
async fn drain(composite: &Composite, from: CompositePosition) -> (CompositePosition, Vec<Event>) {
    let mut events = Vec::new();
    let mut position = from;
    loop {
        let before = events.len();
        position = composite.read(&position, &mut events).await.unwrap();
        if events.len() == before {
            break;
        }
    }
    (position, events)
}

/// Two retentions, one writer each, bootstrapped from `Clock::ZERO`: every
/// update is read exactly once and the key set matches what was written.
#[tokio::test]
async fn test_composite_reader_happy_path() {
    let temp_dir = tempfile::tempdir().unwrap();

    let retention1 = create_retention(temp_dir.path(), 1, &["source1"]).await;
    let retention2 = create_retention(temp_dir.path(), 2, &["source2"]).await;
    let store1 = Arc::new(MemoryStore::new(1));
    let store2 = Arc::new(MemoryStore::new(2));
    let clock1 = create_clock(&["source1"]).await;
    let clock2 = create_clock(&["source2"]).await;

    let writer1 = create_writer("source1", &retention1, &store1, &clock1);
    let writer2 = create_writer("source2", &retention2, &store2, &clock2);

    let count = (EVENT_BATCH_SIZE * NUM_RETENTION_BATCHES) as u64;
    let mut scn = 1u64;
    let mut key_set = std::collections::HashSet::new();

    for _ in 0..count {
        let key = next_key();
        writer1
            .put(Bytes::from(key.clone()), Bytes::from(next_value()), Scn::new(scn))
            .await
            .unwrap();
        scn += 1;
        writer2
            .put(Bytes::from(key.clone()), Bytes::from(next_value()), Scn::new(scn))
            .await
            .unwrap();
        scn += 1;
        key_set.insert(key);
    }

    let composite = CompositeRetentionStoreReader::new(vec![
        create_reader("source1", &retention1, &store1),
        create_reader("source2", &retention2, &store2),
    ])
    .unwrap();

    let start = composite.position_at(&Clock::ZERO).await.unwrap();
    let (position, events) = drain(&composite, start).await;

    assert_eq!(events.len(), 2 * count as usize);
    assert_eq!(key_set.len(), count as usize);

    let delivered_keys: std::collections::HashSet<String> = events
        .iter()
        .map(|e| String::from_utf8(e.key.to_vec()).unwrap())
        .collect();
    assert_eq!(delivered_keys, key_set);

    assert!(!position.is_indexed());
}

/// After catching up, the composite reader streams fresh writes (one
/// child's pull per call) and point lookups return the latest value under
/// the source that wrote it.
#[tokio::test]
async fn test_composite_reader_streaming() {
    let temp_dir = tempfile::tempdir().unwrap();

    let retention1 = create_retention(temp_dir.path(), 1, &["source1"]).await;
    let retention2 = create_retention(temp_dir.path(), 2, &["source2"]).await;
    let store1 = Arc::new(MemoryStore::new(1));
    let store2 = Arc::new(MemoryStore::new(2));
    let clock1 = create_clock(&["source1"]).await;
    let clock2 = create_clock(&["source2"]).await;

    let writer1 = create_writer("source1", &retention1, &store1, &clock1);
    let writer2 = create_writer("source2", &retention2, &store2, &clock2);

    let count = (EVENT_BATCH_SIZE * NUM_RETENTION_BATCHES) as u64;
    let mut scn = 1u64;
    for _ in 0..count {
        let key = next_key();
        writer1
            .put(Bytes::from(key.clone()), Bytes::from(next_value()), Scn::new(scn))
            .await
            .unwrap();
        scn += 1;
        writer2
            .put(Bytes::from(key), Bytes::from(next_value()), Scn::new(scn))
            .await
            .unwrap();
        scn += 1;
    }

    let composite = CompositeRetentionStoreReader::new(vec![
        create_reader("source1", &retention1, &store1),
        create_reader("source2", &retention2, &store2),
    ])
    .unwrap();

    let start = composite.position_at(&Clock::ZERO).await.unwrap();
    let (position, events) = drain(&composite, start).await;
    assert_eq!(events.len(), 2 * count as usize);

    // Caught up: the composite position has left the indexed state.
    assert!(!position.is_indexed());

    // Five more writes per source, the same key written to both stores.
    let mut expected1 = std::collections::HashMap::new();
    let mut expected2 = std::collections::HashMap::new();
    for _ in 0..5 {
        let key = next_key();
        let value1 = next_value();
        let value2 = next_value();
        writer1
            .put(
                Bytes::from(key.clone()),
                Bytes::from(value1.clone()),
                Scn::new(scn),
            )
            .await
            .unwrap();
        scn += 1;
        writer2
            .put(
                Bytes::from(key.clone()),
                Bytes::from(value2.clone()),
                Scn::new(scn),
            )
            .await
            .unwrap();
        scn += 1;
        expected1.insert(key.clone(), value1);
        expected2.insert(key, value2);
    }

    // One pull per child: five then five.
    let mut events = Vec::new();
    let position = composite.read(&position, &mut events).await.unwrap();
    assert_eq!(events.len(), 5);

    events.clear();
    let position = composite.read(&position, &mut events).await.unwrap();
    assert_eq!(events.len(), 5);

    // No new writes: an empty pull leaves the position unchanged.
    events.clear();
    let after = composite.read(&position, &mut events).await.unwrap();
    assert!(events.is_empty());
    assert_eq!(after, position);

    // Each written key's latest value is retrievable under its source.
    for (key, value) in &expected1 {
        let values = composite.lookup(key.as_bytes()).await.unwrap();
        assert_eq!(
            values.get(&SourceId::new("source1")).unwrap(),
            &Bytes::from(value.clone())
        );
    }
    for (key, value) in &expected2 {
        let values = composite.lookup(key.as_bytes()).await.unwrap();
        assert_eq!(
            values.get(&SourceId::new("source2")).unwrap(),
            &Bytes::from(value.clone())
        );
    }
}

/// Three sources split across two retentions: sources 1 and 2 share one
/// retention and one watermark clock, source 3 owns its own. Composite
/// replay from ZERO returns every event with per-source order preserved.
#[tokio::test]
async fn test_composite_reader_with_three_substores() {
    let temp_dir = tempfile::tempdir().unwrap();

    let retention_a = create_retention(temp_dir.path(), 1, &["source1", "source2"]).await;
    let retention_b = create_retention(temp_dir.path(), 2, &["source3"]).await;

    let store1 = Arc::new(MemoryStore::new(1));
    let store2 = Arc::new(MemoryStore::new(2));
    let store3 = Arc::new(MemoryStore::new(3));

    let clock_a = create_clock(&["source1", "source2"]).await;
    let clock_b = create_clock(&["source3"]).await;

    let writer1 = create_writer("source1", &retention_a, &store1, &clock_a);
    let writer2 = create_writer("source2", &retention_a, &store2, &clock_a);
    let writer3 = create_writer("source3", &retention_b, &store3, &clock_b);

    let per_source = 100u64;
    let mut scn = 1u64;
    for _ in 0..per_source {
        writer1
            .put(Bytes::from(next_key()), Bytes::from(next_value()), Scn::new(scn))
            .await
            .unwrap();
        scn += 1;
        writer2
            .put(Bytes::from(next_key()), Bytes::from(next_value()), Scn::new(scn))
            .await
            .unwrap();
        scn += 1;
        writer3
            .put(Bytes::from(next_key()), Bytes::from(next_value()), Scn::new(scn))
            .await
            .unwrap();
        scn += 1;
    }

    let composite = CompositeRetentionStoreReader::new(vec![
        create_reader("source1", &retention_a, &store1),
        create_reader("source2", &retention_a, &store2),
        create_reader("source3", &retention_b, &store3),
    ])
    .unwrap();
    assert_eq!(composite.union_sources().len(), 3);

    let start = composite.position_at(&Clock::ZERO).await.unwrap();
    let (position, events) = drain(&composite, start).await;

    assert_eq!(events.len(), 3 * per_source as usize);
    assert!(!position.is_indexed());

    // Per-source order: scns on each source's own coordinate never go
    // backwards within that source's stream.
    for (source, coordinate) in [("source1", 0usize), ("source2", 1), ("source3", 0)] {
        let source = SourceId::new(source);
        let scns: Vec<u64> = events
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.clock.coordinate(coordinate))
            .collect();
        assert_eq!(scns.len(), per_source as usize);
        assert!(scns.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
