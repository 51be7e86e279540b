//! Watermark persistence.
//!
//! Provides the [`WaterMarkStore`] trait for persisting per-source
//! watermarks, a file-backed implementation, and an in-memory simulated
//! implementation with fault injection for tests.
//!
//! # File Format
//!
//! One text line per source:
//!
//! ```text
//! source1=1344549006000,1344549006299
//! source2=1344549006001,1344549006300
//! ```
//!
//! where the two numbers are the low and high watermark. The file is
//! rewritten through a temporary file followed by a rename so a crash mid
//! flush never leaves a torn file behind.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use krati_core::{Scn, SourceId};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{ClockError, ClockResult};

/// A persisted watermark entry: `(source, low, high)`.
pub type WaterMarkEntry = (SourceId, Scn, Scn);

/// Durable storage for per-source watermarks.
#[async_trait]
pub trait WaterMarkStore: Send + Sync {
    /// Loads all persisted watermark entries.
    ///
    /// An empty result means no watermarks have ever been flushed.
    async fn load(&self) -> ClockResult<Vec<WaterMarkEntry>>;

    /// Persists the given entries, replacing any previous contents.
    ///
    /// The replacement must be atomic: a crash during `save` leaves either
    /// the old contents or the new contents, never a mixture.
    async fn save(&self, entries: &[WaterMarkEntry]) -> ClockResult<()>;
}

// -----------------------------------------------------------------------------
// File-backed store
// -----------------------------------------------------------------------------

/// Watermark store backed by a small text file.
#[derive(Debug, Clone)]
pub struct FileWaterMarkStore {
    /// Path of the watermark file.
    path: PathBuf,
}

impl FileWaterMarkStore {
    /// Creates a store for the given file path.
    ///
    /// The file does not need to exist yet; it is created on first `save`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path of the watermark file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(contents: &str) -> ClockResult<Vec<WaterMarkEntry>> {
        let mut entries = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let line_number = (index + 1) as u32;

            let (source, marks) =
                line.split_once('=')
                    .ok_or(ClockError::CorruptWaterMarks {
                        line: line_number,
                        reason: "missing '=' separator",
                    })?;
            let (low, high) = marks
                .split_once(',')
                .ok_or(ClockError::CorruptWaterMarks {
                    line: line_number,
                    reason: "missing ',' separator",
                })?;

            let low: u64 = low.parse().map_err(|_| ClockError::CorruptWaterMarks {
                line: line_number,
                reason: "low watermark is not a number",
            })?;
            let high: u64 = high.parse().map_err(|_| ClockError::CorruptWaterMarks {
                line: line_number,
                reason: "high watermark is not a number",
            })?;

            entries.push((SourceId::new(source), Scn::new(low), Scn::new(high)));
        }
        Ok(entries)
    }
}

#[async_trait]
impl WaterMarkStore for FileWaterMarkStore {
    async fn load(&self) -> ClockResult<Vec<WaterMarkEntry>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ClockError::io("read", e)),
        }
    }

    async fn save(&self, entries: &[WaterMarkEntry]) -> ClockResult<()> {
        let mut contents = String::new();
        for (source, low, high) in entries {
            contents.push_str(source.as_str());
            contents.push('=');
            contents.push_str(&low.get().to_string());
            contents.push(',');
            contents.push_str(&high.get().to_string());
            contents.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ClockError::io("create_dir_all", e))?;
        }

        // Write the replacement beside the target, sync, then rename over it.
        let tmp_path = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| ClockError::io("create", e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| ClockError::io("write", e))?;
        file.sync_all().await.map_err(|e| ClockError::io("sync", e))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| ClockError::io("rename", e))?;

        debug!(path = %self.path.display(), sources = entries.len(), "Saved watermarks");
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Simulated store
// -----------------------------------------------------------------------------

/// In-memory watermark store for tests.
///
/// Clones share state via `Arc` for multi-handle testing. A forced save
/// failure (one-shot) exercises the flush error path.
#[derive(Debug, Clone, Default)]
pub struct SimulatedWaterMarkStore {
    /// Persisted entries.
    entries: Arc<Mutex<Vec<WaterMarkEntry>>>,
    /// Force the next save to fail (one-shot).
    force_save_fail: Arc<Mutex<bool>>,
}

impl SimulatedWaterMarkStore {
    /// Creates an empty simulated store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with entries, as if previously flushed.
    #[must_use]
    pub fn with_entries(entries: Vec<WaterMarkEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
            force_save_fail: Arc::new(Mutex::new(false)),
        }
    }

    /// Forces the next `save` to fail.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn force_save_fail(&self) {
        *self.force_save_fail.lock().expect("fault flag lock poisoned") = true;
    }

    /// Returns the persisted entries (for assertions in tests).
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn entries(&self) -> Vec<WaterMarkEntry> {
        self.entries.lock().expect("entries lock poisoned").clone()
    }
}

#[async_trait]
impl WaterMarkStore for SimulatedWaterMarkStore {
    async fn load(&self) -> ClockResult<Vec<WaterMarkEntry>> {
        Ok(self.entries())
    }

    async fn save(&self, entries: &[WaterMarkEntry]) -> ClockResult<()> {
        {
            let mut forced = self.force_save_fail.lock().expect("fault flag lock poisoned");
            if *forced {
                *forced = false;
                return Err(ClockError::Io {
                    operation: "save",
                    message: "simulated failure (forced)".into(),
                });
            }
        }

        *self.entries.lock().expect("entries lock poisoned") = entries.to_vec();
        Ok(())
    }
}
