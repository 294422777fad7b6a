//! Database handle
//!
//! A [`Database`] is a cheap, link-counted reference to one open package
//! database: the LMDB environment, its primary store and the lazily opened
//! secondary indexes. Iterators hold their own link, so the stores stay open
//! until the last handle and the last iterator are gone.

use crate::key_iter::KeyIterator;
use crate::match_iter::MatchIterator;
use crate::rebuild::{self, RebuildReport};
use crate::termination::TerminationController;
use crate::verify::{self, VerifyReport};
use parking_lot::{Mutex, RwLock};
use pkgdb_core::{
    DbConfig, DbOp, Header, HeaderValidator, IndexEntry, InstanceNumber, KeyedStore, OpCounters,
    OpStats, OpenMode, PkgdbError, Result, StoreId, Tag, WriteBatch,
};
use pkgdb_lmdb::{
    decode_index_value, encode_index_value, instance_to_key, is_storable_key, key_to_instance,
    LmdbOptions, LmdbStore, COUNTER_KEY, PRIMARY_STORE,
};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared state behind every link of one database.
pub(crate) struct DbInner {
    config: DbConfig,
    path: PathBuf,
    store: LmdbStore,
    primary: StoreId,
    indexes: RwLock<HashMap<Tag, StoreId>>,
    ops: OpCounters,
    writer: Mutex<()>,
    terminated: AtomicBool,
    controller: TerminationController,
}

impl DbInner {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn config(&self) -> &DbConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &LmdbStore {
        &self.store
    }

    pub(crate) fn primary(&self) -> StoreId {
        self.primary
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_terminated() {
            return Err(PkgdbError::Terminated);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.store.is_read_only() {
            return Err(PkgdbError::ReadOnly);
        }
        Ok(())
    }

    /// Termination check point for iterator advances.
    pub(crate) fn check_signals(&self) -> Result<()> {
        self.controller.check_signals(self.config.terminate_action)?;
        self.ensure_open()
    }

    /// Mark this handle terminated, syncing it first. Returns false if it
    /// already was.
    pub(crate) fn terminate(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        if !self.store.is_read_only() {
            if let Err(e) = self.store.sync() {
                tracing::warn!("Sync of {} during termination failed: {}", self.path.display(), e);
            }
        }
        tracing::info!("Terminated package database {}", self.path.display());
        true
    }

    pub(crate) fn index_store(&self, tag: Tag) -> Result<StoreId> {
        if !tag.is_indexed() {
            return Err(PkgdbError::InvalidArgument(format!(
                "{tag} has no secondary index"
            )));
        }

        let cached = self.indexes.read().get(&tag).copied();
        if let Some(id) = cached {
            return Ok(id);
        }

        let id = self.store.open_store(tag.name(), true)?;
        self.indexes.write().insert(tag, id);
        tracing::debug!("Opened {} index of {}", tag, self.path.display());
        Ok(id)
    }

    /// Index entries under `key`, in stored order. A read-only database
    /// without this index simply has no entries.
    pub(crate) fn index_lookup(&self, tag: Tag, key: &[u8]) -> Result<Vec<IndexEntry>> {
        self.ensure_open()?;
        if !is_storable_key(key) {
            return Ok(Vec::new());
        }
        let store = match self.index_store(tag) {
            Ok(store) => store,
            Err(PkgdbError::NotFound(_)) if self.store.is_read_only() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        self.store
            .get_all(store, key)?
            .iter()
            .map(|value| {
                decode_index_value(value).ok_or_else(|| {
                    PkgdbError::Corruption(format!(
                        "{tag} index value of {} bytes",
                        value.len()
                    ))
                })
            })
            .collect()
    }

    /// Header blob stored under `instance`, charged to the get counter.
    pub(crate) fn fetch(&self, instance: InstanceNumber) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let key = instance_to_key(instance);
        self.ops
            .time(DbOp::Get, || self.store.get(self.primary, &key))
    }

    /// Overwrite the header blob of `instance` in the primary store.
    pub(crate) fn write_blob(&self, instance: InstanceNumber, blob: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let key = instance_to_key(instance);
        self.ops
            .time(DbOp::Put, || self.store.put(self.primary, &key, blob))
    }

    /// Key of `store` following `after`. Steps over the primary store are
    /// charged to the get counter.
    pub(crate) fn next_key(
        &self,
        store: StoreId,
        after: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if store == self.primary {
            self.ops.time(DbOp::Get, || self.store.next_key(store, after))
        } else {
            self.store.next_key(store, after)
        }
    }

    /// Visit every primary record, counter included, as one get.
    pub(crate) fn for_each_primary(
        &self,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.ops
            .time(DbOp::Get, || self.store.for_each(self.primary, f))
    }

    /// Next instance number to allocate. Starts at 1.
    pub(crate) fn next_instance(&self) -> Result<InstanceNumber> {
        match self.fetch_counter()? {
            Some(next) => Ok(next.max(1)),
            None => Ok(1),
        }
    }

    fn fetch_counter(&self) -> Result<Option<InstanceNumber>> {
        let raw = self
            .ops
            .time(DbOp::Get, || self.store.get(self.primary, &COUNTER_KEY))?;
        match raw {
            None => Ok(None),
            Some(bytes) => key_to_instance(&bytes).map(Some).ok_or_else(|| {
                PkgdbError::Corruption(format!("instance counter of {} bytes", bytes.len()))
            }),
        }
    }

    pub(crate) fn stage_counter(&self, batch: &mut WriteBatch, next: InstanceNumber) {
        batch.put(self.primary, &COUNTER_KEY, &instance_to_key(next));
    }

    /// Buffer the primary record and every index entry of one header.
    pub(crate) fn stage_record(
        &self,
        batch: &mut WriteBatch,
        instance: InstanceNumber,
        blob: &[u8],
        header: &Header,
    ) -> Result<()> {
        batch.put(self.primary, &instance_to_key(instance), blob);
        self.stage_index_entries(batch, instance, header, false)
    }

    fn stage_removal(
        &self,
        batch: &mut WriteBatch,
        instance: InstanceNumber,
        header: &Header,
    ) -> Result<()> {
        batch.delete(self.primary, &instance_to_key(instance), None);
        self.stage_index_entries(batch, instance, header, true)
    }

    fn stage_index_entries(
        &self,
        batch: &mut WriteBatch,
        instance: InstanceNumber,
        header: &Header,
        remove: bool,
    ) -> Result<()> {
        for tag in Tag::INDEXED {
            let keys = header.index_keys(tag);
            if keys.is_empty() {
                continue;
            }
            let store = self.index_store(tag)?;
            for (key, file_num) in keys {
                if !is_storable_key(&key) {
                    tracing::warn!(
                        "Header #{}: {} value of {} bytes cannot be indexed",
                        instance,
                        tag,
                        key.len()
                    );
                    continue;
                }
                let value = encode_index_value(IndexEntry::new(instance, file_num));
                if remove {
                    batch.delete(store, &key, Some(&value));
                } else {
                    batch.put(store, &key, &value);
                }
            }
        }
        Ok(())
    }

    /// Commit a batch in one write transaction, charged to `op`.
    pub(crate) fn commit(&self, batch: &mut WriteBatch, op: DbOp) -> Result<usize> {
        self.ensure_writable()?;
        self.ops.time(op, || batch.commit(&self.store))
    }

    /// Live records in the primary store (the counter record excluded).
    pub(crate) fn record_count(&self) -> Result<u64> {
        self.ensure_open()?;
        let keys = self
            .ops
            .time(DbOp::Get, || self.store.key_count(self.primary))?;
        let has_counter = self.fetch_counter()?.is_some();
        Ok(if has_counter { keys.saturating_sub(1) } else { keys })
    }

    pub(crate) fn open_all(&self) -> Result<()> {
        self.ensure_open()?;
        for tag in Tag::INDEXED {
            self.index_store(tag)?;
        }
        Ok(())
    }
}

/// Handle to an open package database
///
/// Cloning (or [`link`](Database::link)) adds a reference; [`close`](Database::close)
/// drops one. The environment is synced and closed when the last reference,
/// including those held by iterators, is released.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

impl Database {
    /// Open the database described by `config`.
    ///
    /// Fails with `NotFound` if the data file is absent and the mode does
    /// not allow creation. The handle is tracked by the process-wide
    /// [`TerminationController`].
    pub fn open(config: DbConfig) -> Result<Self> {
        Self::open_with_controller(config, TerminationController::global())
    }

    /// Open, tracked by the given termination controller.
    pub fn open_with_controller(config: DbConfig, controller: &TerminationController) -> Result<Self> {
        let path = config.data_file();
        let opts = LmdbOptions::from_config(&config);
        Self::open_file(config, path, &opts, controller)
    }

    /// Open an environment file directly. Rebuild uses this for its shadow copy.
    pub(crate) fn open_file(
        config: DbConfig,
        path: PathBuf,
        opts: &LmdbOptions,
        controller: &TerminationController,
    ) -> Result<Self> {
        let created = !path.exists();
        let store = LmdbStore::open(&path, opts)?;
        let primary = store.open_store(PRIMARY_STORE, false)?;

        let inner = Arc::new(DbInner {
            config,
            path,
            store,
            primary,
            indexes: RwLock::new(HashMap::new()),
            ops: OpCounters::new(),
            writer: Mutex::new(()),
            terminated: AtomicBool::new(false),
            controller: controller.clone(),
        });
        controller.track(&inner);

        if created {
            inner.open_all()?;
        }

        tracing::info!(
            "Opened package database {} ({})",
            inner.path.display(),
            if opts.read_only { "read-only" } else { "read-write" }
        );
        Ok(Self { inner })
    }

    /// Create an empty database. Fails with `AlreadyExists` if one with
    /// records is already present.
    pub fn init(config: &DbConfig) -> Result<()> {
        let path = config.data_file();
        // Cleanup of these short-lived handles is ours, not the controller's
        let controller = TerminationController::new();

        if path.exists() {
            let probe = config.clone().with_mode(OpenMode::read_only());
            let records = match Self::open_with_controller(probe, &controller) {
                Ok(existing) => {
                    let records = existing.record_count()?;
                    existing.close()?;
                    records
                }
                // Environment without a primary store yet
                Err(PkgdbError::NotFound(_)) => 0,
                Err(e) => return Err(e),
            };
            if records > 0 {
                return Err(PkgdbError::AlreadyExists(path.display().to_string()));
            }
        }

        let db = Self::open_with_controller(config.clone().with_mode(OpenMode::create()), &controller)?;
        db.open_all()?;
        db.sync()?;
        db.close()?;

        tracing::info!("Initialized empty package database at {}", path.display());
        Ok(())
    }

    /// Read-only consistency scan of every store.
    pub fn verify(config: &DbConfig) -> Result<VerifyReport> {
        verify::verify(config)
    }

    /// Rebuild the database from its primary store, validating every header.
    ///
    /// No handle on this database may be open while the rebuild runs.
    pub fn rebuild(
        config: &DbConfig,
        validator: Option<&dyn HeaderValidator>,
    ) -> Result<RebuildReport> {
        rebuild::rebuild(config, validator, TerminationController::global())
    }

    pub(crate) fn from_inner(inner: Arc<DbInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<DbInner> {
        &self.inner
    }

    /// Eagerly open every secondary index, surfacing failures now rather
    /// than mid-scan.
    pub fn open_all(&self) -> Result<()> {
        self.inner.open_all()
    }

    /// Another reference to the same database.
    pub fn link(&self) -> Self {
        self.clone()
    }

    /// Drop this reference. The last one syncs and closes the environment.
    pub fn close(self) -> Result<()> {
        let path = self.inner.path.clone();
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => {
                if !inner.store.is_read_only() && !inner.is_terminated() {
                    inner.store.sync()?;
                }
                drop(inner);
                tracing::info!("Closed package database {}", path.display());
                Ok(())
            }
            Err(shared) => {
                tracing::debug!(
                    "Released link on {} ({} remaining)",
                    path.display(),
                    Arc::strong_count(&shared) - 1
                );
                Ok(())
            }
        }
    }

    /// Flush committed data to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.store.sync()
    }

    /// Number of installed headers named `name`.
    pub fn count_packages(&self, name: &str) -> Result<usize> {
        let mut iter = self.match_iter(Tag::Name, Some(name.as_bytes()))?;
        let mut count = 0;
        while iter.next_header()?.is_some() {
            count += 1;
        }
        iter.free()?;
        Ok(count)
    }

    /// Accumulated count and elapsed time of one primary-store operation kind.
    pub fn op(&self, kind: DbOp) -> OpStats {
        self.inner.ops.get(kind)
    }

    /// Store a header under a freshly allocated instance number and index it.
    pub fn add(&self, header: &Header) -> Result<InstanceNumber> {
        self.inner.ensure_writable()?;
        let blob = header.to_blob()?;

        let _guard = self.inner.writer.lock();
        let instance = self.inner.next_instance()?;
        let next = instance
            .checked_add(1)
            .ok_or_else(|| PkgdbError::InvalidState("instance numbers exhausted".to_string()))?;

        let mut batch = WriteBatch::new();
        self.inner.stage_counter(&mut batch, next);
        self.inner.stage_record(&mut batch, instance, &blob, header)?;
        self.inner.commit(&mut batch, DbOp::Put)?;

        tracing::debug!("Added header #{} ({})", instance, header.nevra());
        Ok(instance)
    }

    /// Delete a header and its index entries. Returns false if it was absent.
    pub fn remove(&self, instance: InstanceNumber) -> Result<bool> {
        if instance == 0 {
            return Err(PkgdbError::InvalidArgument(
                "instance 0 is reserved".to_string(),
            ));
        }
        self.inner.ensure_writable()?;

        let _guard = self.inner.writer.lock();
        let Some(blob) = self.inner.fetch(instance)? else {
            return Ok(false);
        };
        let header = Header::from_blob(&blob)?;

        let mut batch = WriteBatch::new();
        self.inner.stage_removal(&mut batch, instance, &header)?;
        self.inner.commit(&mut batch, DbOp::Delete)?;

        tracing::debug!("Removed header #{} ({})", instance, header.nevra());
        Ok(true)
    }

    /// Header stored under `instance`.
    pub fn get(&self, instance: InstanceNumber) -> Result<Option<Header>> {
        if instance == 0 {
            return Ok(None);
        }
        match self.inner.fetch(instance)? {
            Some(blob) => Ok(Some(Header::from_blob(&blob)?)),
            None => Ok(None),
        }
    }

    /// Match iterator over `tag`; `None` scans every header.
    pub fn match_iter(&self, tag: Tag, key: Option<&[u8]>) -> Result<MatchIterator> {
        MatchIterator::new(self, tag, key)
    }

    /// Key iterator over `tag`'s index (or the primary store for `Packages`).
    pub fn key_iter(&self, tag: Tag) -> Result<KeyIterator> {
        KeyIterator::new(self, tag)
    }

    /// Live headers in the primary store.
    pub fn record_count(&self) -> Result<u64> {
        self.inner.record_count()
    }

    /// Strong references to this database, iterators included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.store.is_read_only()
    }

    /// True once a termination cleanup has run over this handle.
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("read_only", &self.is_read_only())
            .field("refs", &self.ref_count())
            .finish()
    }
}
