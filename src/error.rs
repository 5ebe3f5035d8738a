//! Error taxonomy for the indexing core.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors surfaced by the indexing core.
///
/// Variants map directly onto the propagation policy: `StorageFailure`,
/// `ProviderFailure`, `SchemaFailure` and `Cancelled` abort the call that
/// raised them; `GraphFailure` and `CacheFailure` are always logged and
/// swallowed by their callers; `NotFound`, `IOFailure` and `ParseFailure`
/// are per-file and the run continues past them.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("not found: {what} ({detail})")]
    NotFound { what: String, detail: String },

    #[error("io failure on {path}: {cause}")]
    IoFailure { path: PathBuf, cause: String },

    #[error("schema failure for {path}: {cause}")]
    SchemaFailure { path: PathBuf, cause: String },

    #[error("storage failure during {phase}: {cause}")]
    StorageFailure { phase: String, cause: String },

    #[error("cancelled during {phase}")]
    Cancelled { phase: String },

    #[error("embedding provider failure: {cause}")]
    ProviderFailure { cause: String },

    #[error("parse failure on {path}: {cause}")]
    ParseFailure { path: PathBuf, cause: String },

    #[error("graph update failure: {cause}")]
    GraphFailure { cause: String },

    #[error("cache maintenance failure: {cause}")]
    CacheFailure { cause: String },

    #[error("invalid configuration: {cause}")]
    ConfigFailure { cause: String },
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        IndexError::IoFailure {
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    pub fn storage(phase: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        IndexError::StorageFailure {
            phase: phase.into(),
            cause: cause.to_string(),
        }
    }

    pub fn not_found(what: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        IndexError::NotFound {
            what: what.into(),
            detail: detail.to_string(),
        }
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        IndexError::StorageFailure {
            phase: "sqlite".to_string(),
            cause: e.to_string(),
        }
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::IoFailure {
            path: PathBuf::new(),
            cause: e.to_string(),
        }
    }
}

impl From<notify::Error> for IndexError {
    fn from(e: notify::Error) -> Self {
        IndexError::IoFailure {
            path: PathBuf::new(),
            cause: e.to_string(),
        }
    }
}
