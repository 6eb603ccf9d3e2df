//! fimwatch - File Integrity Monitor
//!
//! A host agent that keeps an authoritative database of monitored
//! filesystem entries (size, ownership, permissions, timestamps, content
//! hashes, inode identity) and emits a structured JSON event whenever a
//! monitored entry is added, modified, or deleted relative to that
//! database.
//!
//! # Features
//!
//! - **Scheduled scans**: bounded recursive traversal of each monitored
//!   root, reconciled against the database under one lock discipline.
//!
//! - **Watcher entry points**: realtime and whodata events delivered by
//!   external watcher threads reenter the same reconciliation pipeline,
//!   the latter carrying user/process provenance into the event.
//!
//! - **Inode collision resolution**: delete-then-rename sequences that
//!   recycle an inode are untangled by walking the conflict graph, with a
//!   forced update as the cycle-breaking last resort.
//!
//! - **Capacity guard**: a hysteretic state machine raises one alert per
//!   band transition as the database approaches its entry limit.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  ┌────────────────┐  ┌────────────────┐
//! │ scheduled scan│  │ realtime event │  │ whodata event  │
//! └───────┬───────┘  └───────┬────────┘  └───────┬────────┘
//!         │                  │                   │
//!         └─────────────┬────┴───────────────────┘
//!                       ▼
//!               ┌───────────────┐   ignore / restrict / skip-fs
//!               │    checker    │   recursion level, mode match
//!               └───────┬───────┘
//!                       ▼
//!               ┌───────────────┐   size, perm, owner, mtime,
//!               │  attributes   │   md5/sha1/sha256, checksum
//!               └───────┬───────┘
//!                       ▼
//!               ┌───────────────┐   path-keyed rows,
//!               │  entry store  │◄─ (inode, dev) index,
//!               │   (SQLite)    │   collision resolver
//!               └───────┬───────┘
//!                       ▼
//!               ┌───────────────┐
//!               │ event builder │──► event sink (JSON)
//!               └───────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fimwatch::config::{MonitorConfig, MonitoredDir};
//! use fimwatch::monitor::FimEngine;
//! use fimwatch::store::SqliteStore;
//! use fimwatch::transport::ChannelSink;
//! use fimwatch::types::Checks;
//!
//! let config = Arc::new(MonitorConfig::new(vec![
//!     MonitoredDir::new("/etc", Checks::DEFAULT),
//! ]));
//! let store = SqliteStore::open_in_memory(None).unwrap();
//! let (sink, events, _logs) = ChannelSink::new();
//!
//! let engine = FimEngine::new(config, store, Arc::new(sink));
//! engine.scan(); // baseline
//! engine.scan(); // reports changes since the baseline
//! while let Ok(event) = events.try_recv() {
//!     println!("{event}");
//! }
//! ```

pub mod attributes;
pub mod config;
pub mod error;
pub mod event;
pub mod hash;
pub mod monitor;
pub mod progress;
pub mod state;
pub mod store;
pub mod transport;
pub mod types;

pub use config::{CliArgs, MonitorConfig, MonitoredDir};
pub use error::{FimError, Result, StoreError};
pub use event::EventKind;
pub use monitor::{FimEngine, ScanSummary};
pub use state::DbState;
pub use store::{EntryStore, SqliteStore};
pub use transport::{ChannelSink, EventSink, JsonLinesSink};
pub use types::{Checks, FileData, FileEntry, ScanMode, WhodataEvent};
