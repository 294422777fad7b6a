//! Match iterator
//!
//! Candidates come from one of three places: an index lookup, an explicit
//! list of instance numbers, or a full primary-store scan. Each candidate is
//! fetched, validated and run through the filter chain; the survivor is
//! checked out to the caller until the next advance.
//!
//! Lazy write-back: with rewrite enabled, a checked-out header marked
//! modified is written to the primary store when the iterator moves past it
//! or is freed. Only the header blob is rewritten; index entries are left
//! as they are.

use crate::db::Database;
use crate::key_iter::KeyIterator;
use pkgdb_core::{
    observe, Header, HeaderValidator, IndexEntry, InstanceNumber, MatchMode, PatternMatcher,
    PkgdbError, Result, Tag, Verdict,
};
use pkgdb_lmdb::key_to_instance;
use std::sync::Arc;

enum Candidates {
    /// Ascending walk over the primary store.
    Scan { keys: KeyIterator, fetched: usize },
    /// Fixed list: index lookup order, then append order.
    Set { entries: Vec<IndexEntry>, pos: usize },
}

struct Checkout {
    entry: IndexEntry,
    header: Header,
    modified: bool,
}

enum State {
    Fresh,
    Positioned(Checkout),
    Exhausted,
    /// A validator rejected a header; the scan is over.
    Aborted,
}

/// Query cursor over package headers
///
/// Advance with [`next_header`](Self::next_header): `Ok(Some)` yields a
/// header, `Ok(None)` marks the end and `Err` a failure.
pub struct MatchIterator {
    db: Database,
    candidates: Candidates,
    filters: Vec<PatternMatcher>,
    rewrite: bool,
    validator: Option<Arc<dyn HeaderValidator>>,
    appended: usize,
    last: IndexEntry,
    state: State,
}

impl MatchIterator {
    /// Iterator over `tag`. `key == None` scans every header; otherwise
    /// the key is looked up in `tag`'s index.
    ///
    /// `Tag::Packages` takes a 4-byte big-endian instance number and
    /// `Tag::Label` a `name[-version[-release]]` string. No match is an
    /// empty iterator, not an error.
    pub fn new(db: &Database, tag: Tag, key: Option<&[u8]>) -> Result<Self> {
        db.inner().ensure_open()?;
        let mut filters = Vec::new();

        let candidates = match key {
            None => Candidates::Scan {
                keys: KeyIterator::new(db, Tag::Packages)?,
                fetched: 0,
            },
            Some(key) => {
                let entries = match tag {
                    Tag::Packages => {
                        let instance = key_to_instance(key).ok_or_else(|| {
                            PkgdbError::InvalidArgument(format!(
                                "instance key must be 4 bytes, got {}",
                                key.len()
                            ))
                        })?;
                        if instance == 0 {
                            Vec::new()
                        } else {
                            vec![IndexEntry::new(instance, 0)]
                        }
                    }
                    Tag::Label => {
                        let label = std::str::from_utf8(key).map_err(|_| {
                            PkgdbError::InvalidArgument("label is not UTF-8".to_string())
                        })?;
                        let (entries, label_filters) = lookup_label(db, label)?;
                        filters = label_filters;
                        entries
                    }
                    _ => db.inner().index_lookup(tag, key)?,
                };
                Candidates::Set { entries, pos: 0 }
            }
        };

        Ok(Self {
            db: db.link(),
            candidates,
            filters,
            rewrite: false,
            validator: None,
            appended: 0,
            last: IndexEntry::default(),
            state: State::Fresh,
        })
    }

    /// Add a filter: `tag`'s value must match `pattern` under `mode`.
    /// Filters are ANDed. A pattern that does not compile leaves the
    /// iterator unchanged.
    pub fn set_pattern(&mut self, tag: Tag, mode: MatchMode, pattern: &str) -> Result<()> {
        let matcher = PatternMatcher::new(tag, mode, pattern)?;
        self.filters.push(matcher);
        Ok(())
    }

    /// Extend the candidate set with explicit instance numbers.
    ///
    /// A scan iterator becomes a set iterator holding only appended
    /// instances. An empty list or an instance of 0 is rejected with
    /// `InvalidArgument` and nothing is appended.
    pub fn append(&mut self, instances: &[InstanceNumber]) -> Result<()> {
        if instances.is_empty() {
            return Err(PkgdbError::InvalidArgument(
                "no instances to append".to_string(),
            ));
        }
        if instances.contains(&0) {
            return Err(PkgdbError::InvalidArgument(
                "instance 0 is reserved".to_string(),
            ));
        }

        if let Candidates::Scan { .. } = self.candidates {
            self.candidates = Candidates::Set {
                entries: Vec::with_capacity(instances.len()),
                pos: 0,
            };
        }
        if let Candidates::Set { entries, .. } = &mut self.candidates {
            entries.extend(instances.iter().map(|&i| IndexEntry::new(i, 0)));
        }
        self.appended += instances.len();

        if matches!(self.state, State::Exhausted) {
            self.state = State::Fresh;
        }
        Ok(())
    }

    /// Enable or disable lazy write-back. Returns the previous setting.
    pub fn set_rewrite(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.rewrite, enabled)
    }

    /// Mark the checked-out header as modified (or not). Returns the
    /// previous flag; without a checked-out header nothing changes.
    pub fn set_modified(&mut self, modified: bool) -> bool {
        match &mut self.state {
            State::Positioned(checkout) => std::mem::replace(&mut checkout.modified, modified),
            _ => false,
        }
    }

    /// Validate every fetched header blob before it is yielded.
    pub fn set_validator(&mut self, validator: Arc<dyn HeaderValidator>) {
        self.validator = Some(validator);
    }

    /// Advance to the next matching header.
    pub fn next_header(&mut self) -> Result<Option<&Header>> {
        self.flush()?;
        self.db.inner().check_signals()?;

        if matches!(self.state, State::Exhausted | State::Aborted) {
            return Ok(None);
        }

        loop {
            let Some(entry) = self.next_candidate()? else {
                self.state = State::Exhausted;
                return Ok(None);
            };

            let Some(blob) = self.db.inner().fetch(entry.instance)? else {
                tracing::debug!("Skipping stale index entry for header #{}", entry.instance);
                observe::record_skip("stale");
                continue;
            };

            if let Some(validator) = &self.validator {
                match validator.validate(&blob) {
                    Verdict::Accept => {}
                    Verdict::Note(message) => {
                        tracing::warn!("Header #{}: {}", entry.instance, message);
                    }
                    Verdict::Reject(message) => {
                        self.state = State::Aborted;
                        return Err(PkgdbError::Integrity {
                            offset: entry.instance,
                            message,
                        });
                    }
                }
            }

            let header = Header::from_blob(&blob).map_err(|e| {
                PkgdbError::Corruption(format!("header #{} does not decode: {}", entry.instance, e))
            })?;

            if !self.filters.iter().all(|f| f.matches_header(&header)) {
                observe::record_skip("filtered");
                continue;
            }

            self.last = entry;
            self.state = State::Positioned(Checkout {
                entry,
                header,
                modified: false,
            });
            return Ok(self.header());
        }
    }

    fn next_candidate(&mut self) -> Result<Option<IndexEntry>> {
        match &mut self.candidates {
            Candidates::Scan { keys, fetched } => {
                while keys.step()? {
                    // Primary keys are instance numbers; anything else is skipped
                    if let Some(instance) = keys.instance() {
                        *fetched += 1;
                        return Ok(Some(IndexEntry::new(instance, 0)));
                    }
                }
                Ok(None)
            }
            Candidates::Set { entries, pos } => {
                let next = entries.get(*pos).copied();
                if next.is_some() {
                    *pos += 1;
                }
                Ok(next)
            }
        }
    }

    /// Write back the checked-out header if it is modified and rewrite is on.
    fn flush(&mut self) -> Result<()> {
        let State::Positioned(checkout) = &mut self.state else {
            return Ok(());
        };
        if !(self.rewrite && checkout.modified) {
            return Ok(());
        }

        let blob = checkout.header.to_blob()?;
        self.db.inner().write_blob(checkout.entry.instance, &blob)?;
        checkout.modified = false;
        tracing::debug!("Rewrote header #{}", checkout.entry.instance);
        Ok(())
    }

    /// The checked-out header.
    pub fn header(&self) -> Option<&Header> {
        match &self.state {
            State::Positioned(checkout) => Some(&checkout.header),
            _ => None,
        }
    }

    /// Mutable access to the checked-out header. Call
    /// [`set_modified`](Self::set_modified) for changes to be written back.
    pub fn header_mut(&mut self) -> Option<&mut Header> {
        match &mut self.state {
            State::Positioned(checkout) => Some(&mut checkout.header),
            _ => None,
        }
    }

    /// Instance number of the most recently yielded header (0 before the first).
    pub fn offset(&self) -> InstanceNumber {
        self.last.instance
    }

    /// File number of the index entry that produced the most recent header.
    pub fn file_num(&self) -> u32 {
        self.last.file_num
    }

    /// Size of the candidate set. For a full scan, the headers visited so far.
    pub fn count(&self) -> usize {
        match &self.candidates {
            Candidates::Scan { fetched, .. } => *fetched,
            Candidates::Set { entries, .. } => entries.len(),
        }
    }

    /// Instances added through [`append`](Self::append).
    pub fn appended(&self) -> usize {
        self.appended
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Flush any pending write-back and release the iterator.
    pub fn free(mut self) -> Result<()> {
        let flushed = self.flush();
        self.state = State::Exhausted;
        flushed
    }
}

impl Drop for MatchIterator {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Discarding pending rewrite of header #{}: {}", self.last.instance, e);
        }
    }
}

/// Resolve `name[-version[-release]]`, trying the whole label as a name
/// first, then splitting off a version, then a version and release.
fn lookup_label(db: &Database, label: &str) -> Result<(Vec<IndexEntry>, Vec<PatternMatcher>)> {
    let inner = db.inner();

    let entries = inner.index_lookup(Tag::Name, label.as_bytes())?;
    if !entries.is_empty() {
        return Ok((entries, Vec::new()));
    }

    let Some((name, version)) = label.rsplit_once('-') else {
        return Ok((Vec::new(), Vec::new()));
    };
    let entries = inner.index_lookup(Tag::Name, name.as_bytes())?;
    if !entries.is_empty() {
        let filters = vec![PatternMatcher::new(Tag::Version, MatchMode::Strcmp, version)?];
        return Ok((entries, filters));
    }

    let Some((name, version_only)) = name.rsplit_once('-') else {
        return Ok((Vec::new(), Vec::new()));
    };
    let entries = inner.index_lookup(Tag::Name, name.as_bytes())?;
    if entries.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let filters = vec![
        PatternMatcher::new(Tag::Version, MatchMode::Strcmp, version_only)?,
        PatternMatcher::new(Tag::Release, MatchMode::Strcmp, version)?,
    ];
    Ok((entries, filters))
}
