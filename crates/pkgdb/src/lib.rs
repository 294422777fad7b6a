//! pkgdb: installed-package metadata index
//!
//! pkgdb stores package headers in an LMDB primary store keyed by instance
//! number and keeps one secondary index per searchable tag:
//! - **Database handle**: shared, link-counted access to one database
//! - **Match iterator**: index lookup or full scan, pattern filters, lazy write-back
//! - **Key iterator**: raw walk over one index's key space
//! - **Rebuild**: shadow copy with validation, installed by atomic rename
//! - **Termination controller**: signal flag checked at safe points
//!
//! # Quick Start
//!
//! ```no_run
//! use pkgdb::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let config = DbConfig::new("/").with_mode(OpenMode::create());
//! let db = Database::open(config)?;
//!
//! let header = Header::new()
//!     .with_string(Tag::Name, "bash")
//!     .with_string(Tag::Version, "5.2.15");
//! db.add(&header)?;
//!
//! let mut iter = db.match_iter(Tag::Name, Some(b"bash"))?;
//! while let Some(h) = iter.next_header()? {
//!     println!("{}", h.nevra());
//! }
//! iter.free()?;
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod key_iter;
pub mod match_iter;
pub mod prelude;
pub mod rebuild;
pub mod registry;
pub mod termination;
pub mod verify;

// Re-export core types
pub use pkgdb_core::{
    config::{DbConfig, OpenMode, SyncMode, TerminateAction},
    error::{PkgdbError, Result},
    pattern::{MatchMode, PatternMatcher},
    traits::{HeaderValidator, KeyedStore, Verdict},
    types::{DbOp, Header, IndexEntry, InstanceNumber, OpStats, Tag, TagValue},
};

// Re-export the storage binding
pub use pkgdb_lmdb::LmdbStore;

pub use db::Database;
pub use key_iter::KeyIterator;
pub use match_iter::MatchIterator;
pub use rebuild::{rebuild, RebuildReport};
pub use registry::DbRegistry;
pub use termination::TerminationController;
pub use verify::{verify, VerifyReport};
