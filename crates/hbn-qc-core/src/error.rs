//! Error types for the QC pipeline
//!
//! Every fatal condition carries the path it was raised for, so the CLI can
//! print a message that points at the offending file.

use std::path::PathBuf;

/// QC pipeline errors
#[derive(thiserror::Error, Debug)]
pub enum QcError {
    /// Failed to read or write a file or directory
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A glob pattern could not be compiled
    #[error("invalid glob pattern {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// The participant registry is missing, unreadable or lacks the id column
    #[error("participant registry {path}: {reason}")]
    Registry { path: PathBuf, reason: String },

    /// A confound file name that does not follow the BIDS derivative layout
    #[error("malformed confound file name: {path}")]
    MalformedConfoundName { path: PathBuf },

    /// A confound table whose content cannot be used
    #[error("confound table {path}: {reason}")]
    Confound { path: PathBuf, reason: String },

    /// A subject id that is not `sub-<alphanumeric label>`
    #[error("invalid subject id: {0:?}")]
    InvalidSubjectId(String),

    /// Configuration values that fail validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file that is not valid TOML for [`crate::config::QcConfig`]
    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Delimited table read/write failure
    #[error("table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl QcError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        QcError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        QcError::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Result type for QC operations
pub type QcResult<T> = Result<T, QcError>;
