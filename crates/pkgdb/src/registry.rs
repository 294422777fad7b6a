//! Path-keyed cache of open databases.

use crate::db::{Database, DbInner};
use crate::termination::TerminationController;
use parking_lot::Mutex;
use pkgdb_core::{DbConfig, KeyedStore, PkgdbError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Weak;

/// Hands out links to already-open databases instead of opening the same
/// environment twice.
///
/// Entries are weak: once every handle on a path is closed the entry is
/// dead and the next [`open`](Self::open) starts fresh. Nothing is global;
/// callers create and share a registry explicitly.
pub struct DbRegistry {
    controller: TerminationController,
    handles: Mutex<HashMap<PathBuf, Weak<DbInner>>>,
}

impl DbRegistry {
    pub fn new() -> Self {
        Self::with_controller(TerminationController::global().clone())
    }

    pub fn with_controller(controller: TerminationController) -> Self {
        Self {
            controller,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Link to the open database at `config`'s data file, or open it.
    ///
    /// A cached read-only handle cannot serve a read-write request; that
    /// fails with `InvalidState` until the read-only handle is closed.
    pub fn open(&self, config: DbConfig) -> Result<Database> {
        let path = config.data_file();
        let mut handles = self.handles.lock();

        if let Some(inner) = handles.get(&path).and_then(Weak::upgrade) {
            if inner.store().is_read_only() && !config.mode.read_only {
                return Err(PkgdbError::InvalidState(format!(
                    "{} is already open read-only",
                    path.display()
                )));
            }
            tracing::debug!("Reusing open handle on {}", inner.path().display());
            return Ok(Database::from_inner(inner));
        }

        handles.retain(|_, weak| weak.strong_count() > 0);
        let db = Database::open_with_controller(config, &self.controller)?;
        handles.insert(path, std::sync::Arc::downgrade(db.inner()));
        Ok(db)
    }

    /// Databases with at least one live handle.
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DbRegistry {
    fn default() -> Self {
        Self::new()
    }
}
