pub mod count;
pub mod init;
pub mod keys;
pub mod query;
pub mod rebuild;
pub mod verify;
