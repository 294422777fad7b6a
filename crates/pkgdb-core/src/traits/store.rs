use crate::error::Result;

/// Handle to one named store inside a keyed-store environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(pub usize);

/// A buffered mutation, applied by [`KeyedStore::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        store: StoreId,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        store: StoreId,
        key: Vec<u8>,
        /// Only this duplicate; `None` removes every value under the key.
        value: Option<Vec<u8>>,
    },
}

/// Keyed storage engine binding
///
/// Byte-string keys and values, one named store per index plus one for the
/// primary store. Every call is self-contained: implementations open and
/// close their own transactions, so no transaction outlives a call.
pub trait KeyedStore: Send + Sync {
    /// Open a named store. Writable environments create it when missing.
    ///
    /// `dup_sort` stores keep several sorted values per key.
    fn open_store(&self, name: &str, dup_sort: bool) -> Result<StoreId>;

    /// Single value under `key` (the first duplicate for dup stores).
    fn get(&self, store: StoreId, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Every value under `key`, in stored order.
    fn get_all(&self, store: StoreId, key: &[u8]) -> Result<Vec<Vec<u8>>>;

    fn put(&self, store: StoreId, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete `key` (or one duplicate of it). Missing keys are not an error.
    fn del(&self, store: StoreId, key: &[u8], value: Option<&[u8]>) -> Result<()>;

    /// Smallest key strictly greater than `after`, or the first key.
    fn next_key(&self, store: StoreId, after: Option<&[u8]>) -> Result<Option<Vec<u8>>>;

    /// Number of distinct keys in a store.
    fn key_count(&self, store: StoreId) -> Result<u64>;

    /// Visit every key/value pair in key order inside one read transaction.
    /// An error from `f` stops the walk and is returned.
    fn for_each(
        &self,
        store: StoreId,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()>;

    /// Apply a batch in one write transaction: all or nothing.
    fn apply(&self, ops: &[WriteOp]) -> Result<()>;

    /// Force committed data to durable storage.
    fn sync(&self) -> Result<()>;

    fn is_read_only(&self) -> bool;
}

/// Collects mutations, then commits them atomically through
/// [`KeyedStore::apply`]. Dropping an uncommitted batch applies nothing.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, store: StoreId, key: &[u8], value: &[u8]) -> &mut Self {
        self.ops.push(WriteOp::Put {
            store,
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self
    }

    pub fn delete(&mut self, store: StoreId, key: &[u8], value: Option<&[u8]>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            store,
            key: key.to_vec(),
            value: value.map(<[u8]>::to_vec),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply and clear the buffered operations.
    pub fn commit<S: KeyedStore + ?Sized>(&mut self, store: &S) -> Result<usize> {
        if self.ops.is_empty() {
            return Ok(0);
        }
        store.apply(&self.ops)?;
        let applied = self.ops.len();
        self.ops.clear();
        Ok(applied)
    }
}
