//! Key iterator: raw walk over one store's key space.

use crate::db::Database;
use pkgdb_core::{InstanceNumber, PkgdbError, Result, StoreId, Tag};
use pkgdb_lmdb::{key_to_instance, COUNTER_KEY};

/// Cursor over the distinct keys of one index (or of the primary store for
/// [`Tag::Packages`]). Values are never read.
///
/// Pre-increment protocol: no key is available until [`advance`](Self::advance)
/// has returned `Ok(true)` once.
///
/// ```no_run
/// # use pkgdb::{Database, Tag, Result};
/// # fn names(db: &Database) -> Result<()> {
/// let mut keys = db.key_iter(Tag::Name)?;
/// while keys.advance()? {
///     println!("{}", String::from_utf8_lossy(keys.key().unwrap_or_default()));
/// }
/// # Ok(())
/// # }
/// ```
///
/// The cursor re-seeks from the last key on every step, so no store
/// transaction is held between calls.
pub struct KeyIterator {
    db: Database,
    tag: Tag,
    // None: read-only database without this index
    store: Option<StoreId>,
    current: Option<Vec<u8>>,
    exhausted: bool,
}

impl KeyIterator {
    pub fn new(db: &Database, tag: Tag) -> Result<Self> {
        db.inner().ensure_open()?;
        let store = match tag {
            Tag::Packages => Some(db.inner().primary()),
            Tag::Label => {
                return Err(PkgdbError::InvalidArgument(
                    "Label is a lookup alias and has no key space".to_string(),
                ))
            }
            _ => match db.inner().index_store(tag) {
                Ok(store) => Some(store),
                Err(PkgdbError::NotFound(_)) if db.is_read_only() => None,
                Err(e) => return Err(e),
            },
        };

        Ok(Self {
            db: db.link(),
            tag,
            store,
            current: None,
            exhausted: false,
        })
    }

    /// Move to the next key. `Ok(false)` at the end.
    ///
    /// Polls the termination controller first.
    pub fn advance(&mut self) -> Result<bool> {
        self.db.inner().check_signals()?;
        self.step()
    }

    /// Advance without the termination check point; callers that already
    /// checked (match iterator, rebuild) use this.
    pub(crate) fn step(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let Some(store) = self.store else {
            self.exhausted = true;
            return Ok(false);
        };

        // The counter record sorts first in the primary store and is not a header
        let after = match (&self.current, self.tag) {
            (Some(key), _) => Some(key.as_slice()),
            (None, Tag::Packages) => Some(&COUNTER_KEY[..]),
            (None, _) => None,
        };

        match self.db.inner().next_key(store, after)? {
            Some(key) => {
                self.current = Some(key);
                Ok(true)
            }
            None => {
                self.current = None;
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    /// Current key, once [`advance`](Self::advance) has succeeded.
    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_deref()
    }

    /// Length of the current key in bytes; 0 before the first advance.
    pub fn key_size(&self) -> usize {
        self.current.as_ref().map_or(0, Vec::len)
    }

    /// Current key read as an instance number (primary store walks).
    pub fn instance(&self) -> Option<InstanceNumber> {
        self.current.as_deref().and_then(key_to_instance)
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Release the iterator and its link on the database.
    pub fn free(self) {}
}

impl Iterator for KeyIterator {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => self.current.clone().map(Ok),
            Ok(false) => None,
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}
