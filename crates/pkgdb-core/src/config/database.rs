use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Data file name inside the database directory.
pub const DATA_FILE: &str = "packages.mdb";

/// How a database is opened, mirroring `O_RDONLY` / `O_RDWR` / `O_CREAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenMode {
    pub read_only: bool,
    pub create: bool,
}

impl OpenMode {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            create: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read_only: false,
            create: false,
        }
    }

    /// Read-write, creating the database if it is missing.
    pub fn create() -> Self {
        Self {
            read_only: false,
            create: true,
        }
    }
}

impl Default for OpenMode {
    fn default() -> Self {
        Self::read_only()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// `fsync()` on every commit.
    #[default]
    Full,

    /// Skip syncing the meta page on commit. The last transaction may be lost
    /// on an OS crash but the database stays consistent.
    NoMetaSync,

    /// Leave flushing to the OS page cache. Test and scratch databases only.
    NoSync,
}

/// What the termination controller's `check_signals` does after cleaning up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TerminateAction {
    /// Exit the process with the given status.
    Exit(i32),
    /// Return `PkgdbError::Terminated` to the caller.
    Error,
}

impl Default for TerminateAction {
    fn default() -> Self {
        TerminateAction::Exit(1)
    }
}

/// Configuration for one package database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Install root the database lives under
    pub root: PathBuf,

    /// Database directory relative to `root`
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub mode: OpenMode,

    /// Permission bits for newly created files
    #[serde(default = "default_perms")]
    pub perms: u32,

    /// Maximum LMDB map size in bytes (default: 1GB)
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Maximum concurrent LMDB readers (default: 126)
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,

    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Records written per shadow transaction during rebuild (default: 1000)
    #[serde(default = "default_rebuild_batch_size")]
    pub rebuild_batch_size: usize,

    #[serde(default)]
    pub terminate_action: TerminateAction,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("var/lib/pkgdb")
}

fn default_perms() -> u32 {
    0o644
}

fn default_map_size() -> usize {
    1024 * 1024 * 1024 // 1GB
}

fn default_max_readers() -> u32 {
    126
}

fn default_rebuild_batch_size() -> usize {
    1000
}

impl DbConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            db_path: default_db_path(),
            mode: OpenMode::default(),
            perms: default_perms(),
            map_size: default_map_size(),
            max_readers: default_max_readers(),
            sync_mode: SyncMode::default(),
            rebuild_batch_size: default_rebuild_batch_size(),
            terminate_action: TerminateAction::default(),
        }
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_perms(mut self, perms: u32) -> Self {
        self.perms = perms;
        self
    }

    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_rebuild_batch_size(mut self, size: usize) -> Self {
        self.rebuild_batch_size = size.max(1);
        self
    }

    pub fn with_terminate_action(mut self, action: TerminateAction) -> Self {
        self.terminate_action = action;
        self
    }

    /// `<root>/<db_path>`. An absolute `db_path` is still placed under the root.
    pub fn db_dir(&self) -> PathBuf {
        let relative: &Path = self.db_path.strip_prefix("/").unwrap_or(&self.db_path);
        self.root.join(relative)
    }

    pub fn data_file(&self) -> PathBuf {
        self.db_dir().join(DATA_FILE)
    }
}
