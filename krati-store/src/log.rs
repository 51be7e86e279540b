//! Log-structured persistent key-value store.
//!
//! The store is an append-only record log plus an in-memory latest-value
//! index. Every mutation appends one record; the index is rebuilt by a
//! recovery scan on open. A torn record at the tail (crash mid append) is
//! detected by length or checksum and truncated away.
//!
//! # Record Format
//!
//! ```text
//! +----------+--------+----------+----------+---------+----------+
//! |  CRC32   |   Op   |  KeyLen  | ValueLen |   Key   |  Value   |
//! | (4 bytes)|(1 byte)| (4 bytes)| (4 bytes)|(N bytes)|(M bytes) |
//! +----------+--------+----------+----------+---------+----------+
//! ```
//!
//! - CRC32: checksum of Op + KeyLen + ValueLen + Key + Value
//! - Op: 0 = put, 1 = delete (delete records carry no value)
//!
//! All integers are stored in little-endian format.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use krati_core::limits::{EVENT_KEY_SIZE_BYTES_MAX, EVENT_VALUE_SIZE_BYTES_MAX};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::storage::{Storage, StorageFile};
use crate::store::DataStore;

/// Size of the record header in bytes.
const RECORD_HEADER_SIZE: usize = 13; // 4 + 1 + 4 + 4

/// Record operation: put.
const OP_PUT: u8 = 0;
/// Record operation: delete.
const OP_DELETE: u8 = 1;

/// Name of the log file inside the store directory.
const LOG_FILE_NAME: &str = "store.log";

/// Configuration for a log store.
#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    /// Directory holding the store files.
    pub dir: PathBuf,
    /// Whether to fsync after every mutation (vs explicit `flush`).
    pub sync_on_write: bool,
}

impl LogStoreConfig {
    /// Creates a new configuration.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sync_on_write: false, // Default to batched syncs for throughput.
        }
    }

    /// Enables sync after every mutation.
    #[must_use]
    pub const fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }
}

/// Append state guarded by the writer lock.
struct LogWriter {
    /// Open log file handle.
    file: Box<dyn StorageFile>,
    /// Current append offset.
    offset: u64,
}

/// Persistent log-structured key-value store.
///
/// Holds the latest value per key; history belongs to the retention.
pub struct LogStore {
    /// Configuration.
    config: LogStoreConfig,
    /// Append state (serializes mutations).
    writer: tokio::sync::Mutex<LogWriter>,
    /// Latest-value index.
    index: RwLock<HashMap<Bytes, Bytes>>,
    /// Whether the store is closed.
    closed: AtomicBool,
}

impl LogStore {
    /// Opens or creates a store in the configured directory.
    ///
    /// Existing records are replayed to rebuild the index. A torn record at
    /// the tail is truncated with a warning.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the log
    /// cannot be read.
    pub async fn open<S: Storage>(storage: &S, config: LogStoreConfig) -> StoreResult<Self> {
        storage.create_dir_all(&config.dir).await?;

        let path = config.dir.join(LOG_FILE_NAME);
        let file = storage.open(&path).await?;
        let data = file.read_all().await?;

        let (index, valid_len) = Self::replay(&data);

        if (valid_len as usize) < data.len() {
            warn!(
                path = %path.display(),
                dropped = data.len() as u64 - valid_len,
                "Truncating torn tail of store log"
            );
            file.truncate(valid_len).await?;
            file.sync().await?;
        }

        info!(
            path = %path.display(),
            keys = index.len(),
            bytes = valid_len,
            "Opened log store"
        );

        Ok(Self {
            config,
            writer: tokio::sync::Mutex::new(LogWriter {
                file,
                offset: valid_len,
            }),
            index: RwLock::new(index),
            closed: AtomicBool::new(false),
        })
    }

    /// Replays the log, returning the latest-value index and the length of
    /// the valid prefix.
    fn replay(data: &[u8]) -> (HashMap<Bytes, Bytes>, u64) {
        let mut index = HashMap::new();
        let mut buf = data;
        let mut valid_len = 0u64;

        loop {
            if buf.remaining() < RECORD_HEADER_SIZE {
                break;
            }

            let crc = buf.get_u32_le();
            let op = buf.get_u8();
            let key_len = buf.get_u32_le() as usize;
            let value_len = buf.get_u32_le() as usize;

            if op > OP_DELETE
                || key_len > EVENT_KEY_SIZE_BYTES_MAX as usize
                || value_len > EVENT_VALUE_SIZE_BYTES_MAX as usize
                || buf.remaining() < key_len + value_len
            {
                break;
            }

            let body_start = data.len() - buf.remaining() - 9;
            let body_end = data.len() - buf.remaining() + key_len + value_len;
            let actual_crc = crc32fast::hash(&data[body_start..body_end]);
            if actual_crc != crc {
                break;
            }

            let key = Bytes::copy_from_slice(&buf[..key_len]);
            buf.advance(key_len);
            let value = Bytes::copy_from_slice(&buf[..value_len]);
            buf.advance(value_len);

            match op {
                OP_PUT => {
                    index.insert(key, value);
                }
                _ => {
                    index.remove(&key);
                }
            }

            valid_len = (data.len() - buf.remaining()) as u64;
        }

        (index, valid_len)
    }

    /// Encodes one record.
    #[allow(clippy::cast_possible_truncation)] // Sizes validated against limits.
    fn encode_record(op: u8, key: &[u8], value: &[u8]) -> Bytes {
        let mut body = BytesMut::with_capacity(9 + key.len() + value.len());
        body.put_u8(op);
        body.put_u32_le(key.len() as u32);
        body.put_u32_le(value.len() as u32);
        body.put_slice(key);
        body.put_slice(value);

        let crc = crc32fast::hash(&body);
        let mut record = BytesMut::with_capacity(4 + body.len());
        record.put_u32_le(crc);
        record.put_slice(&body);
        record.freeze()
    }

    /// Appends a record and returns once it is written (and synced if
    /// configured).
    async fn append(&self, op: u8, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let record = Self::encode_record(op, key, value);

        let mut writer = self.writer.lock().await;
        writer.file.write_at(writer.offset, &record).await?;
        writer.offset += record.len() as u64;

        if self.config.sync_on_write {
            writer.file.sync().await?;
        }

        debug!(op, bytes = record.len(), "Appended store record");
        Ok(())
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn validate(key: &[u8], value: &[u8]) -> StoreResult<()> {
        if key.len() > EVENT_KEY_SIZE_BYTES_MAX as usize {
            return Err(StoreError::EntryTooLarge {
                what: "key",
                size: key.len(),
                max: EVENT_KEY_SIZE_BYTES_MAX as usize,
            });
        }
        if value.len() > EVENT_VALUE_SIZE_BYTES_MAX as usize {
            return Err(StoreError::EntryTooLarge {
                what: "value",
                size: value.len(),
                max: EVENT_VALUE_SIZE_BYTES_MAX as usize,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for LogStore {
    async fn put(&self, key: Bytes, value: Bytes) -> StoreResult<()> {
        self.check_open()?;
        Self::validate(&key, &value)?;

        self.append(OP_PUT, &key, &value).await?;

        let mut index = self.index.write().expect("index lock poisoned");
        index.insert(key, value);
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
        self.check_open()?;
        let index = self.index.read().expect("index lock poisoned");
        Ok(index.get(key).cloned())
    }

    async fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        self.check_open()?;

        self.append(OP_DELETE, key, &[]).await?;

        let mut index = self.index.write().expect("index lock poisoned");
        Ok(index.remove(key).is_some())
    }

    async fn scan(&self) -> StoreResult<Vec<(Bytes, Bytes)>> {
        self.check_open()?;
        let index = self.index.read().expect("index lock poisoned");
        Ok(index.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn flush(&self) -> StoreResult<()> {
        self.check_open()?;
        let writer = self.writer.lock().await;
        writer.file.sync().await
    }

    async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(()); // Already closed.
        }
        let writer = self.writer.lock().await;
        writer.file.sync().await
    }
}
