//! Krati Store - Key-value collaborators for the retention subsystem.
//!
//! The retention machinery treats its key-value store as an external
//! collaborator: a persistent mapping holding the **latest** value per key,
//! while the retention holds the **history** of changes. This crate
//! provides that contract ([`DataStore`]), an in-memory implementation with
//! deterministic fault injection for tests ([`MemoryStore`]), a persistent
//! log-structured implementation ([`LogStore`]), and the file-system
//! abstraction ([`Storage`]) shared with retention segment persistence.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Crash safety**: recovery truncates torn tails, never mis-decodes
//! - **Checksums**: CRC32 on every persisted record
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod log;
mod storage;
mod store;

pub use error::{StoreError, StoreResult};
pub use log::{LogStore, LogStoreConfig};
pub use storage::{Storage, StorageFile, TokioStorage};
pub use store::{DataStore, MemoryStore, StoreFaultConfig};
