//! pkgdb core: traits and types for the package metadata index
//!
//! This crate defines the pieces every other pkgdb crate builds on:
//! - Header model: tags, tag values, MessagePack header blobs
//! - Keyed store binding: the byte-level get/put/delete/cursor contract
//! - Pattern matcher: strcmp / regex / glob / default-regex tag filters
//! - Header validation capability used by iterators and rebuild
//! - Per-handle operation counters and optional metrics

pub mod config;
pub mod error;
pub mod observe;
pub mod pattern;
pub mod traits;
pub mod types;

pub use config::{DbConfig, OpenMode, SyncMode, TerminateAction};
pub use error::{PkgdbError, Result};
pub use pattern::{MatchMode, PatternMatcher};
pub use traits::{HeaderValidator, KeyedStore, StoreId, Verdict, WriteBatch, WriteOp};
pub use types::{
    DbOp, Header, IndexEntry, InstanceNumber, OpCounters, OpStats, Tag, TagValue,
};
