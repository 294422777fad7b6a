use lmdb::{Cursor, Database, DatabaseFlags, Environment, EnvironmentFlags, Transaction, WriteFlags};
use lmdb_sys as ffi;
use parking_lot::RwLock;
use pkgdb_core::{
    error::{PkgdbError, Result},
    DbConfig, KeyedStore, StoreId, SyncMode, Tag, WriteOp,
};
use std::os::raw::c_uint;
use std::path::{Path, PathBuf};

/// Map an LMDB error onto the pkgdb taxonomy.
pub(crate) fn store_err(err: lmdb::Error) -> PkgdbError {
    match err {
        lmdb::Error::Corrupted | lmdb::Error::Invalid | lmdb::Error::VersionMismatch => {
            PkgdbError::Corruption(err.to_string())
        }
        lmdb::Error::Other(code) => PkgdbError::Io(std::io::Error::from_raw_os_error(code)),
        other => PkgdbError::Store(other.to_string()),
    }
}

/// Lock file LMDB keeps next to a `NO_SUB_DIR` data file.
pub fn lock_path(data_file: &Path) -> PathBuf {
    let mut name = data_file.as_os_str().to_os_string();
    name.push("-lock");
    PathBuf::from(name)
}

/// Remove a data file and its lock file. Missing files are ignored.
pub fn remove_env_files(data_file: &Path) -> std::io::Result<()> {
    for path in [data_file.to_path_buf(), lock_path(data_file)] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Options for opening one LMDB environment file.
#[derive(Debug, Clone)]
pub struct LmdbOptions {
    pub read_only: bool,
    pub create: bool,
    pub perms: u32,
    pub map_size: usize,
    pub max_readers: u32,
    pub sync_mode: SyncMode,
}

impl LmdbOptions {
    pub fn from_config(cfg: &DbConfig) -> Self {
        Self {
            read_only: cfg.mode.read_only,
            create: cfg.mode.create,
            perms: cfg.perms,
            map_size: cfg.map_size,
            max_readers: cfg.max_readers,
            sync_mode: cfg.sync_mode,
        }
    }

    /// Writable, created from scratch: used for rebuild shadow files.
    pub fn scratch(cfg: &DbConfig) -> Self {
        Self {
            read_only: false,
            create: true,
            ..Self::from_config(cfg)
        }
    }
}

/// LMDB-backed keyed store
///
/// One environment file holds every store as a named LMDB database: the
/// primary store plus one `DUP_SORT` database per indexed tag. Named
/// databases are opened lazily and cached for the environment's lifetime.
pub struct LmdbStore {
    env: Environment,
    path: PathBuf,
    read_only: bool,
    stores: RwLock<Vec<(String, Database)>>,
}

impl LmdbStore {
    /// Open (or create) the environment at `path`.
    pub fn open(path: &Path, opts: &LmdbOptions) -> Result<Self> {
        if !path.exists() {
            if opts.read_only || !opts.create {
                return Err(PkgdbError::NotFound(path.display().to_string()));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Data file is addressed directly so a rebuild can swap it with rename
        let mut flags = EnvironmentFlags::NO_SUB_DIR;
        if opts.read_only {
            flags.insert(EnvironmentFlags::READ_ONLY);
        }
        match opts.sync_mode {
            SyncMode::Full => {}
            SyncMode::NoMetaSync => flags.insert(EnvironmentFlags::NO_META_SYNC),
            SyncMode::NoSync => flags.insert(EnvironmentFlags::NO_SYNC),
        }

        let max_stores = (Tag::INDEXED.len() + 1) as u32;
        let env = Environment::new()
            .set_flags(flags)
            .set_max_dbs(max_stores)
            .set_map_size(opts.map_size)
            .set_max_readers(opts.max_readers)
            .open_with_permissions(path, opts.perms as _)
            .map_err(store_err)?;

        tracing::debug!(
            "Opened LMDB environment {} ({})",
            path.display(),
            if opts.read_only { "read-only" } else { "read-write" }
        );

        Ok(Self {
            env,
            path: path.to_path_buf(),
            read_only: opts.read_only,
            stores: RwLock::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db(&self, store: StoreId) -> Result<Database> {
        self.stores
            .read()
            .get(store.0)
            .map(|(_, db)| *db)
            .ok_or_else(|| PkgdbError::InvalidState(format!("unknown store id {}", store.0)))
    }

    fn write<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut lmdb::RwTransaction<'_>) -> Result<()>,
    {
        if self.read_only {
            return Err(PkgdbError::ReadOnly);
        }
        let mut txn = self.env.begin_rw_txn().map_err(store_err)?;
        f(&mut txn)?;
        txn.commit().map_err(store_err)
    }
}

fn put_in(txn: &mut lmdb::RwTransaction<'_>, db: Database, key: &[u8], value: &[u8]) -> Result<()> {
    match txn.put(db, &key, &value, WriteFlags::empty()) {
        Ok(()) | Err(lmdb::Error::KeyExist) => Ok(()),
        Err(e) => Err(store_err(e)),
    }
}

fn del_in(
    txn: &mut lmdb::RwTransaction<'_>,
    db: Database,
    key: &[u8],
    value: Option<&[u8]>,
) -> Result<()> {
    let Some(value) = value else {
        return match txn.del(db, &key, None) {
            Ok(()) => Ok(()),
            Err(lmdb::Error::NotFound) => {
                tracing::debug!("Delete of absent key ({} bytes)", key.len());
                Ok(())
            }
            Err(e) => Err(store_err(e)),
        };
    };

    // One duplicate only: position on the exact pair, then delete under the cursor
    let mut cursor = txn.open_rw_cursor(db).map_err(store_err)?;
    if seek(&cursor, Some(key), Some(value), ffi::MDB_GET_BOTH)?.is_none() {
        tracing::warn!(
            "Index entry to delete is absent (key {:?})",
            String::from_utf8_lossy(key)
        );
        return Ok(());
    }
    cursor.del(WriteFlags::empty()).map_err(store_err)
}

/// One raw cursor operation. `None` when LMDB has no entry to land on.
fn seek<'txn, C: Cursor<'txn>>(
    cursor: &C,
    key: Option<&[u8]>,
    value: Option<&[u8]>,
    op: c_uint,
) -> Result<Option<(Option<&'txn [u8]>, &'txn [u8])>> {
    match cursor.get(key, value, op) {
        Ok(found) => Ok(Some(found)),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(store_err(e)),
    }
}

/// Positioning ops (first, next) always hand back the key they landed on.
fn landed<'txn>(
    found: Option<(Option<&'txn [u8]>, &'txn [u8])>,
) -> Result<Option<(&'txn [u8], &'txn [u8])>> {
    match found {
        None => Ok(None),
        Some((Some(key), value)) => Ok(Some((key, value))),
        Some((None, _)) => Err(PkgdbError::Store("cursor returned no key".to_string())),
    }
}

impl KeyedStore for LmdbStore {
    fn open_store(&self, name: &str, dup_sort: bool) -> Result<StoreId> {
        if let Some(pos) = self.stores.read().iter().position(|(n, _)| n == name) {
            return Ok(StoreId(pos));
        }

        let mut stores = self.stores.write();
        // Lost a race with another opener
        if let Some(pos) = stores.iter().position(|(n, _)| n == name) {
            return Ok(StoreId(pos));
        }

        let db = if self.read_only {
            match self.env.open_db(Some(name)) {
                Ok(db) => db,
                Err(lmdb::Error::NotFound) => {
                    return Err(PkgdbError::NotFound(format!(
                        "store {name} in {}",
                        self.path.display()
                    )))
                }
                Err(e) => return Err(store_err(e)),
            }
        } else {
            let flags = if dup_sort {
                DatabaseFlags::DUP_SORT
            } else {
                DatabaseFlags::empty()
            };
            self.env.create_db(Some(name), flags).map_err(store_err)?
        };

        stores.push((name.to_string(), db));
        Ok(StoreId(stores.len() - 1))
    }

    fn get(&self, store: StoreId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db(store)?;
        let txn = self.env.begin_ro_txn().map_err(store_err)?;
        match txn.get(db, &key) {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(store_err(e)),
        }
    }

    fn get_all(&self, store: StoreId, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let db = self.db(store)?;
        let txn = self.env.begin_ro_txn().map_err(store_err)?;
        let cursor = txn.open_ro_cursor(db).map_err(store_err)?;

        let mut values = Vec::new();
        let mut found = seek(&cursor, Some(key), None, ffi::MDB_SET_KEY)?;
        while let Some((_, value)) = found {
            values.push(value.to_vec());
            found = seek(&cursor, None, None, ffi::MDB_NEXT_DUP)?;
        }
        Ok(values)
    }

    fn put(&self, store: StoreId, key: &[u8], value: &[u8]) -> Result<()> {
        let db = self.db(store)?;
        self.write(|txn| put_in(txn, db, key, value))
    }

    fn del(&self, store: StoreId, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let db = self.db(store)?;
        self.write(|txn| del_in(txn, db, key, value))
    }

    fn next_key(&self, store: StoreId, after: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        let db = self.db(store)?;
        let txn = self.env.begin_ro_txn().map_err(store_err)?;
        let cursor = txn.open_ro_cursor(db).map_err(store_err)?;

        let next = match after {
            None => landed(seek(&cursor, None, None, ffi::MDB_FIRST)?)?.map(|(k, _)| k),
            // SET_RANGE lands on the first key >= after; step off an exact hit
            Some(after) => match seek(&cursor, Some(after), None, ffi::MDB_SET_RANGE)? {
                Some((Some(k), _)) if k != after => Some(k),
                Some(_) => {
                    landed(seek(&cursor, None, None, ffi::MDB_NEXT_NODUP)?)?.map(|(k, _)| k)
                }
                None => None,
            },
        };
        Ok(next.map(<[u8]>::to_vec))
    }

    fn key_count(&self, store: StoreId) -> Result<u64> {
        let db = self.db(store)?;
        let txn = self.env.begin_ro_txn().map_err(store_err)?;
        let cursor = txn.open_ro_cursor(db).map_err(store_err)?;

        let mut count = 0u64;
        let mut found = landed(seek(&cursor, None, None, ffi::MDB_FIRST)?)?;
        while found.is_some() {
            count += 1;
            found = landed(seek(&cursor, None, None, ffi::MDB_NEXT_NODUP)?)?;
        }
        Ok(count)
    }

    fn for_each(
        &self,
        store: StoreId,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let db = self.db(store)?;
        let txn = self.env.begin_ro_txn().map_err(store_err)?;
        let cursor = txn.open_ro_cursor(db).map_err(store_err)?;

        let mut found = landed(seek(&cursor, None, None, ffi::MDB_FIRST)?)?;
        while let Some((key, value)) = found {
            f(key, value)?;
            found = landed(seek(&cursor, None, None, ffi::MDB_NEXT)?)?;
        }
        Ok(())
    }

    fn apply(&self, ops: &[WriteOp]) -> Result<()> {
        self.write(|txn| {
            for op in ops {
                match op {
                    WriteOp::Put { store, key, value } => {
                        put_in(txn, self.db(*store)?, key, value)?;
                    }
                    WriteOp::Delete { store, key, value } => {
                        del_in(txn, self.db(*store)?, key, value.as_deref())?;
                    }
                }
            }
            Ok(())
        })
    }

    fn sync(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.env.sync(true).map_err(store_err)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_scratch(dir: &Path) -> LmdbStore {
        let cfg = DbConfig::new(dir).with_map_size(16 * 1024 * 1024);
        LmdbStore::open(&dir.join("test.mdb"), &LmdbOptions::scratch(&cfg)).unwrap()
    }

    #[test]
    fn test_missing_file_without_create() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DbConfig::new(dir.path());
        let err = LmdbStore::open(&dir.path().join("absent.mdb"), &LmdbOptions::from_config(&cfg))
            .err()
            .unwrap();
        assert!(matches!(err, PkgdbError::NotFound(_)));
    }

    #[test]
    fn test_put_get_del() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let id = store.open_store("Packages", false).unwrap();

        store.put(id, b"k", b"v1").unwrap();
        assert_eq!(store.get(id, b"k").unwrap(), Some(b"v1".to_vec()));
        store.put(id, b"k", b"v2").unwrap();
        assert_eq!(store.get(id, b"k").unwrap(), Some(b"v2".to_vec()));
        store.del(id, b"k", None).unwrap();
        assert_eq!(store.get(id, b"k").unwrap(), None);
        // Idempotent
        store.del(id, b"k", None).unwrap();
    }

    #[test]
    fn test_open_store_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let a = store.open_store("Name", true).unwrap();
        let b = store.open_store("Name", true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicates_are_sorted_and_deletable() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let id = store.open_store("Name", true).unwrap();

        store.put(id, b"bash", b"\x00\x02").unwrap();
        store.put(id, b"bash", b"\x00\x01").unwrap();
        store.put(id, b"zsh", b"\x00\x03").unwrap();
        assert_eq!(
            store.get_all(id, b"bash").unwrap(),
            vec![b"\x00\x01".to_vec(), b"\x00\x02".to_vec()]
        );

        store.del(id, b"bash", Some(b"\x00\x01")).unwrap();
        assert_eq!(store.get_all(id, b"bash").unwrap(), vec![b"\x00\x02".to_vec()]);
        assert_eq!(store.get_all(id, b"zsh").unwrap(), vec![b"\x00\x03".to_vec()]);
        assert!(store.get_all(id, b"ash").unwrap().is_empty());

        // Last duplicate gone: the key goes with it
        store.del(id, b"bash", Some(b"\x00\x02")).unwrap();
        assert!(store.get_all(id, b"bash").unwrap().is_empty());
        assert_eq!(store.next_key(id, None).unwrap(), Some(b"zsh".to_vec()));
    }

    #[test]
    fn test_delete_of_absent_duplicate_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let id = store.open_store("Name", true).unwrap();
        store.put(id, b"bash", b"\x00\x01").unwrap();

        store.del(id, b"bash", Some(b"\x00\x09")).unwrap();
        store.del(id, b"dash", Some(b"\x00\x01")).unwrap();
        assert_eq!(store.get_all(id, b"bash").unwrap(), vec![b"\x00\x01".to_vec()]);
    }

    #[test]
    fn test_lookup_past_last_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let id = store.open_store("Name", true).unwrap();
        store.put(id, b"bash", b"1").unwrap();

        assert!(store.get_all(id, b"zsh").unwrap().is_empty());
        assert!(store.get_all(id, b"bash-completion").unwrap().is_empty());
        assert!(store.get_all(id, b"a").unwrap().is_empty());
    }

    #[test]
    fn test_walks_over_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let id = store.open_store("Packages", false).unwrap();

        assert!(store.get_all(id, b"k").unwrap().is_empty());
        assert_eq!(store.key_count(id).unwrap(), 0);
        let mut seen = 0;
        store
            .for_each(id, &mut |_, _| {
                seen += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_for_each_visits_every_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let id = store.open_store("Name", true).unwrap();
        store.put(id, b"a", b"1").unwrap();
        store.put(id, b"a", b"2").unwrap();
        store.put(id, b"b", b"1").unwrap();

        let mut pairs = Vec::new();
        store
            .for_each(id, &mut |k, v| {
                pairs.push((k.to_vec(), v.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            pairs,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"a".to_vec(), b"2".to_vec()),
                (b"b".to_vec(), b"1".to_vec()),
            ]
        );
        assert_eq!(store.key_count(id).unwrap(), 2);
    }

    #[test]
    fn test_next_key_walks_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let id = store.open_store("Name", true).unwrap();
        store.put(id, b"b", b"1").unwrap();
        store.put(id, b"b", b"2").unwrap();
        store.put(id, b"a", b"1").unwrap();
        store.put(id, b"c", b"1").unwrap();

        let mut keys = Vec::new();
        let mut cur = store.next_key(id, None).unwrap();
        while let Some(k) = cur {
            cur = store.next_key(id, Some(&k)).unwrap();
            keys.push(k);
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(store.key_count(id).unwrap(), 3);
    }

    #[test]
    fn test_next_key_past_end_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let id = store.open_store("Name", true).unwrap();
        assert_eq!(store.next_key(id, None).unwrap(), None);
        store.put(id, b"m", b"1").unwrap();
        assert_eq!(store.next_key(id, Some(b"z")).unwrap(), None);
        assert_eq!(store.next_key(id, Some(b"m")).unwrap(), None);
        assert_eq!(store.next_key(id, Some(b"a")).unwrap(), Some(b"m".to_vec()));
    }

    #[test]
    fn test_apply_is_atomic_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_scratch(dir.path());
        let id = store.open_store("Packages", false).unwrap();
        let ops = vec![
            WriteOp::Put {
                store: id,
                key: b"a".to_vec(),
                value: b"1".to_vec(),
            },
            WriteOp::Put {
                store: id,
                key: b"b".to_vec(),
                value: b"2".to_vec(),
            },
            WriteOp::Delete {
                store: id,
                key: b"a".to_vec(),
                value: None,
            },
        ];
        store.apply(&ops).unwrap();
        assert_eq!(store.get(id, b"a").unwrap(), None);
        assert_eq!(store.get(id, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mdb");
        {
            let store = open_scratch(dir.path());
            let id = store.open_store("Packages", false).unwrap();
            store.put(id, b"k", b"v").unwrap();
        }

        let cfg = DbConfig::new(dir.path()).with_map_size(16 * 1024 * 1024);
        let store = LmdbStore::open(&path, &LmdbOptions::from_config(&cfg)).unwrap();
        assert!(store.is_read_only());
        let id = store.open_store("Packages", false).unwrap();
        assert_eq!(store.get(id, b"k").unwrap(), Some(b"v".to_vec()));
        assert!(matches!(store.put(id, b"k", b"x"), Err(PkgdbError::ReadOnly)));
        assert!(matches!(
            store.open_store("Name", true),
            Err(PkgdbError::NotFound(_))
        ));
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(
            lock_path(Path::new("/var/lib/pkgdb/packages.mdb")),
            PathBuf::from("/var/lib/pkgdb/packages.mdb-lock")
        );
    }
}
