//! LMDB-backed keyed store for pkgdb
//!
//! Provides the byte-level store binding used by the database handle,
//! iterators and rebuild engine.
//!
//! Key features:
//! - One environment file per database (`NO_SUB_DIR`), swappable by rename
//! - One named LMDB database per store: primary plus one `DUP_SORT` index per tag
//! - Big-endian instance encoding for numeric sort order
//! - Per-call transactions: no transaction outlives a store call

pub mod keys;
pub mod store;

pub use keys::{
    decode_index_value, encode_index_value, instance_to_key, is_storable_key, key_to_instance,
    COUNTER_KEY, MAX_KEY_SIZE, PRIMARY_STORE,
};
pub use store::{lock_path, remove_env_files, LmdbOptions, LmdbStore};
