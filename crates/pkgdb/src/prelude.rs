//! pkgdb Prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use pkgdb::prelude::*;
//! ```

// Core types
pub use crate::{Header, IndexEntry, InstanceNumber, PkgdbError, Result, Tag, TagValue};

// Configs
pub use crate::{DbConfig, OpenMode, SyncMode, TerminateAction};

// Handles and iterators
pub use crate::{Database, DbRegistry, KeyIterator, MatchIterator};

// Filters and validation
pub use crate::{HeaderValidator, MatchMode, PatternMatcher, Verdict};

// Counters
pub use crate::{DbOp, OpStats};

// Maintenance
pub use crate::{RebuildReport, TerminationController, VerifyReport};

// Re-export common external deps
pub use std::sync::Arc;
pub use tracing;
