//! Incremental code index core.
//!
//! Maintains a per-branch SQLite database of file records, text/code
//! chunks with embeddings, and a code-structure graph, kept in sync with
//! a working tree through content-hash change detection rather than full
//! re-scans. A host application supplies the `Provider` (embedding) and,
//! for languages beyond Go, `Parser`/`GraphExtractor` capabilities
//! defined in [`traits`]; everything else — discovery, hashing, branch
//! database lifecycle, the chunk/embed/persist pipeline, the structure
//! graph, the filesystem watcher, and cache eviction — lives here.

pub mod branch_synchronizer;
pub mod cache;
pub mod change_detector;
pub mod chunking;
pub mod config;
pub mod discovery;
pub mod error;
pub mod go_source;
pub mod graph_updater;
pub mod hasher;
pub mod indexer_core;
pub mod processor;
pub mod storage;
pub mod traits;
pub mod types;
pub mod watcher;

#[cfg(test)]
pub mod testutil;

pub use error::IndexError;
pub use error::Result;
