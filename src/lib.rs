//! tree-importer - Concurrent bulk importer of document trees
//!
//! A library and tool for importing a large hierarchical source tree into a
//! document repository, recreating every internal node as a folder document
//! and every leaf as a content document.
//!
//! # Features
//!
//! - **Parallel Import**: Subtrees are split into tasks executed by a fixed
//!   pool of worker threads, each task with its own repository session.
//!
//! - **Bounded Memory**: The task queue is bounded; when it is full the
//!   submitting thread runs the task itself instead of blocking.
//!
//! - **Batched Commits**: Each task commits every `batch_size` documents.
//!
//! - **Throughput Monitoring**: Periodic samples of average and instantaneous
//!   documents per second, optionally written to a performance log.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                Source tree (directory / synthetic)              │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ children() / payload()
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Import Workers                             │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐      │
//! │  │ Task 1  │  │ Task 2  │  │ Task 3  │  ...    │ Task N  │      │
//! │  │ session │  │ session │  │ session │         │ session │      │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘      │
//! │       │  split     │            │                   │           │
//! │       └──────►┌────┴────────────┴───────────┐       │           │
//! │               │   Task Queue                │       │           │
//! │               │  (crossbeam bounded)        │       │           │
//! │               │  - caller-runs when full    │       │           │
//! │               └─────────────────────────────┘       │           │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ create / commit per batch
//!                               ▼
//!                    ┌──────────────────┐
//!                    │  Repository      │
//!                    │  (SQLite / mem)  │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Import a directory
//! tree-importer /data/archive -o repo.db
//!
//! # Into a sub-container, with more workers and a perf log
//! tree-importer /data/archive -o repo.db --target /archive --create-target -w 16 --perf-log perf.tsv
//!
//! # Query results
//! sqlite3 repo.db "SELECT path, size FROM documents WHERE kind = 0 ORDER BY size DESC LIMIT 10"
//! ```

pub mod config;
pub mod error;
pub mod import;
pub mod progress;
pub mod repository;
pub mod source;

pub use config::{AppConfig, CliArgs, ImportConfig, PolicyKind, SourceSpec};
pub use error::{ImportError, Result};
pub use import::{ImportReport, ImportState, Importer, StopHandle};
