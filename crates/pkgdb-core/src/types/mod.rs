pub mod header;
pub mod ops;
pub mod tag;

pub use header::{Header, TagValue};
pub use ops::{DbOp, OpCounters, OpStats};
pub use tag::Tag;

/// Join key of a record in the primary store. Zero is reserved.
pub type InstanceNumber = u32;

/// One secondary-index hit: the record and the position of the matching
/// element inside it (file number for file-list indices, 0 otherwise).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexEntry {
    pub instance: InstanceNumber,
    pub file_num: u32,
}

impl IndexEntry {
    pub fn new(instance: InstanceNumber, file_num: u32) -> Self {
        Self { instance, file_num }
    }
}
