//! Error types for cairn-publish.

use std::path::PathBuf;

use thiserror::Error;

use cairn_core::CoreError;
use cairn_store::StoreError;

/// All errors that can abort a publication phase.
///
/// Transient resolution failures and pin failures never surface here; the
/// components recover from those locally.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Descriptor, config or path errors from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A store call failed with a kind the caller does not tolerate.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A staged `current.json` that does not parse as a build manifest.
    #[error("malformed build manifest at {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("staging directory {path} does not exist")]
    StagingDirMissing { path: PathBuf },

    #[error("staging directory {path} contains no files")]
    StagingDirEmpty { path: PathBuf },

    #[error("version name must not be empty")]
    EmptyVersion,

    /// A version name that would collide with a pointer link or nest paths.
    #[error("invalid version name `{0}`")]
    InvalidVersion(String),

    /// Rollback requested but no earlier root is known.
    #[error("nothing to roll back for `{key}`: no previous root recorded")]
    NoRollbackTarget { key: String },
}

/// Convenience constructor for [`PublishError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PublishError {
    PublishError::Io {
        path: path.into(),
        source,
    }
}
