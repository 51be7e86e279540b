//! File-system abstraction for persistent state.
//!
//! This module provides a trait-based storage abstraction so stores,
//! retention segments, and tests can share one file interface. The trait is
//! intentionally simple: it moves raw bytes. Higher-level concerns (record
//! formats, checksums, recovery) belong to the callers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StoreError, StoreResult};

/// Storage backend trait for persistent files.
///
/// Implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Opens or creates a file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or created.
    async fn open(&self, path: &Path) -> StoreResult<Box<dyn StorageFile>>;

    /// Checks if a file exists at the given path.
    async fn exists(&self, path: &Path) -> StoreResult<bool>;

    /// Lists files in a directory with the given extension, sorted by name.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read.
    async fn list_files(&self, dir: &Path, extension: &str) -> StoreResult<Vec<PathBuf>>;

    /// Removes a file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be removed.
    async fn remove(&self, path: &Path) -> StoreResult<()>;

    /// Renames a file, replacing any existing file at the destination.
    ///
    /// On the same file system this is atomic, which is what makes
    /// write-temp-then-rename replacement safe.
    ///
    /// # Errors
    /// Returns an error if the rename fails.
    async fn rename(&self, from: &Path, to: &Path) -> StoreResult<()>;

    /// Creates a directory and all parent directories.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    async fn create_dir_all(&self, path: &Path) -> StoreResult<()>;
}

/// A handle to an open file for reading and writing.
#[async_trait]
pub trait StorageFile: Send + Sync {
    /// Writes data at the specified offset.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    async fn write_at(&self, offset: u64, data: &[u8]) -> StoreResult<()>;

    /// Reads the entire file contents.
    ///
    /// # Errors
    /// Returns an error if the read fails.
    async fn read_all(&self) -> StoreResult<Bytes>;

    /// Syncs all buffered data to disk (fsync).
    ///
    /// Data written before `sync()` returns survives crashes.
    ///
    /// # Errors
    /// Returns an error if the sync fails.
    async fn sync(&self) -> StoreResult<()>;

    /// Returns the current file size in bytes.
    ///
    /// # Errors
    /// Returns an error if the size cannot be determined.
    async fn size(&self) -> StoreResult<u64>;

    /// Truncates the file to the specified length.
    ///
    /// Used by recovery to drop a torn tail.
    ///
    /// # Errors
    /// Returns an error if the truncation fails.
    async fn truncate(&self, len: u64) -> StoreResult<()>;
}

/// Tokio-based file storage implementation.
///
/// Uses `tokio::fs`, which runs blocking file operations on a thread pool.
/// Not true async I/O, but portable and good enough for segment-sized
/// reads and appends.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioStorage;

impl TokioStorage {
    /// Creates a new Tokio storage instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for TokioStorage {
    async fn open(&self, path: &Path) -> StoreResult<Box<dyn StorageFile>> {
        use tokio::fs::OpenOptions;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(|e| StoreError::io("open", e))?;

        Ok(Box::new(TokioFile {
            file: tokio::sync::Mutex::new(file),
        }))
    }

    async fn exists(&self, path: &Path) -> StoreResult<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| StoreError::io("exists", e))
    }

    async fn list_files(&self, dir: &Path, extension: &str) -> StoreResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| StoreError::io("read_dir", e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io("read_dir_entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == extension) {
                files.push(path);
            }
        }

        // Sort by filename for deterministic ordering.
        files.sort();
        Ok(files)
    }

    async fn remove(&self, path: &Path) -> StoreResult<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| StoreError::io("remove", e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> StoreResult<()> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| StoreError::io("rename", e))
    }

    async fn create_dir_all(&self, path: &Path) -> StoreResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| StoreError::io("create_dir_all", e))
    }
}

/// A file handle using `tokio::fs`.
struct TokioFile {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

#[allow(clippy::significant_drop_tightening)] // Hold the lock for the full operation.
#[async_trait]
impl StorageFile for TokioFile {
    async fn write_at(&self, offset: u64, data: &[u8]) -> StoreResult<()> {
        use tokio::io::{AsyncSeekExt, AsyncWriteExt};

        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| StoreError::io("seek", e))?;
        file.write_all(data)
            .await
            .map_err(|e| StoreError::io("write", e))?;
        Ok(())
    }

    async fn read_all(&self) -> StoreResult<Bytes> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(|e| StoreError::io("seek", e))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| StoreError::io("read", e))?;
        Ok(Bytes::from(buf))
    }

    async fn sync(&self) -> StoreResult<()> {
        let file = self.file.lock().await;
        file.sync_all().await.map_err(|e| StoreError::io("sync", e))
    }

    async fn size(&self) -> StoreResult<u64> {
        let file = self.file.lock().await;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| StoreError::io("metadata", e))?;
        Ok(metadata.len())
    }

    async fn truncate(&self, len: u64) -> StoreResult<()> {
        let file = self.file.lock().await;
        file.set_len(len)
            .await
            .map_err(|e| StoreError::io("truncate", e))
    }
}
