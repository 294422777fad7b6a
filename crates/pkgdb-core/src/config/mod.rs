pub mod database;

pub use database::{DbConfig, OpenMode, SyncMode, TerminateAction};
