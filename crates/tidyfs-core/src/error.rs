use std::path::PathBuf;
use thiserror::Error;

use crate::remediation::{RemediationError, RemediationResult};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The index store is unreachable or corrupt. Fatal to the current request.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Cannot scan '{}': {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Insight cache error: {0}")]
    Cache(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error(transparent)]
    Remediation(#[from] RemediationError),

    /// The filesystem change went through but the index could not be brought in line.
    #[error(
        "{} applied ({}) but the index was not updated: {source}",
        .result.operation,
        .result.message()
    )]
    IndexOutOfSync {
        result: Box<RemediationResult>,
        #[source]
        source: Box<Error>,
    },
}
