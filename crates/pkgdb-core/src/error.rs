use std::io;
use thiserror::Error;

use crate::types::InstanceNumber;

#[derive(Error, Debug)]
pub enum PkgdbError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Pattern {pattern:?} does not compile: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("Header #{offset} failed validation: {message}")]
    Integrity {
        offset: InstanceNumber,
        message: String,
    },

    #[error("Database corruption: {0}")]
    Corruption(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database already exists: {0}")]
    AlreadyExists(String),

    #[error("Database is opened read-only")]
    ReadOnly,

    #[error("Termination requested, database access cancelled")]
    Terminated,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Rebuild error: {0}")]
    Rebuild(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl PkgdbError {
    /// Non-zero status code for surfaces that report plain integers
    /// (CLI exit codes, C-style wrappers).
    ///
    /// Malformed arguments map to `1`, which is also what an append with bad
    /// input reports.
    pub fn status(&self) -> i32 {
        match self {
            PkgdbError::InvalidArgument(_) | PkgdbError::Pattern { .. } => 1,
            PkgdbError::Io(_) | PkgdbError::Store(_) | PkgdbError::Serialization(_) => 2,
            PkgdbError::Integrity { .. } | PkgdbError::Corruption(_) => 3,
            PkgdbError::NotFound(_) | PkgdbError::AlreadyExists(_) | PkgdbError::ReadOnly => 4,
            PkgdbError::Terminated => 5,
            PkgdbError::Rebuild(_) => 6,
            PkgdbError::Config(_) | PkgdbError::InvalidState(_) | PkgdbError::Other(_) => 7,
        }
    }

    /// True for the conditions a caller may retry after fixing its input.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            PkgdbError::InvalidArgument(_) | PkgdbError::Pattern { .. }
        )
    }
}

impl From<rmp_serde::encode::Error> for PkgdbError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        PkgdbError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for PkgdbError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        PkgdbError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PkgdbError>;
