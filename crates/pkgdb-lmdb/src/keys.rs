use pkgdb_core::{IndexEntry, InstanceNumber};

/// Primary-store key of the next-instance counter record.
pub const COUNTER_KEY: [u8; 4] = [0; 4];

/// Name of the primary store.
pub const PRIMARY_STORE: &str = "Packages";

/// LMDB's compiled-in key size limit. Empty keys are rejected as well.
pub const MAX_KEY_SIZE: usize = 511;

/// Whether `key` can be stored as an LMDB key.
pub fn is_storable_key(key: &[u8]) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_SIZE
}

/// Format an instance number as big-endian bytes (preserves sort order in LMDB)
pub fn instance_to_key(instance: InstanceNumber) -> [u8; 4] {
    instance.to_be_bytes()
}

/// Parse an instance number from big-endian bytes
pub fn key_to_instance(bytes: &[u8]) -> Option<InstanceNumber> {
    let raw: [u8; 4] = bytes.try_into().ok()?;
    Some(InstanceNumber::from_be_bytes(raw))
}

/// Secondary-index value: instance number then file number, both big-endian,
/// so LMDB's duplicate sort orders entries by instance first.
pub fn encode_index_value(entry: IndexEntry) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&entry.instance.to_be_bytes());
    out[4..].copy_from_slice(&entry.file_num.to_be_bytes());
    out
}

pub fn decode_index_value(bytes: &[u8]) -> Option<IndexEntry> {
    if bytes.len() != 8 {
        return None;
    }
    let instance = key_to_instance(&bytes[..4])?;
    let file_num = key_to_instance(&bytes[4..])?;
    Some(IndexEntry::new(instance, file_num))
}
