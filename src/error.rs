use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for fallible crate operations.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Errors raised while preparing an analysis.
///
/// The analysis itself never fails; only loading its configuration can.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Configuration file could not be read.
    #[error("failed to read convert config {path}: {source}")]
    ReadConfig {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Configuration file is not valid TOML for [`crate::config::ConvertConfig`].
    #[error("failed to parse convert config {path}: {source}")]
    ParseConfig {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Configuration names an operator kind that does not exist.
    #[error("unknown operator '{name}' in [operators].{list}")]
    UnknownOperator {
        /// Offending name.
        name: String,
        /// List the name appeared in.
        list: &'static str,
    },
    /// Decision report could not be encoded as JSON.
    #[error("failed to encode decisions: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConvertError {
    pub(crate) fn unknown_operator(name: impl Into<String>, list: &'static str) -> Self {
        ConvertError::UnknownOperator {
            name: name.into(),
            list,
        }
    }
}
