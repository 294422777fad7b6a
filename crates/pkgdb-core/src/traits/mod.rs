pub mod store;
pub mod validate;

pub use store::{KeyedStore, StoreId, WriteBatch, WriteOp};
pub use validate::{HeaderValidator, Verdict};
