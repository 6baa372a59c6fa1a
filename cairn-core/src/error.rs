//! Error types for cairn-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from descriptor, config and type parsing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (write path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// `build.json` exists but could not be parsed.
    #[error("failed to parse build descriptor at {path}: {source}")]
    DescriptorParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `build.json` did not exist at the expected path.
    #[error("build descriptor not found at {path}; run `cairn stage` first")]
    DescriptorNotFound { path: PathBuf },

    /// A field required by the current phase is absent from `build.json`.
    #[error("build descriptor at {path} is missing required field `{field}`")]
    MissingField { path: PathBuf, field: &'static str },

    /// The config file could not be parsed.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config parsed but holds values the engine cannot use.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid CID `{0}`")]
    InvalidCid(String),

    #[error("invalid content path `{0}`; expected /ipfs/<cid>/.. or /ipns/<name>/..")]
    InvalidPath(String),
}

/// Convenience constructor for [`CoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
