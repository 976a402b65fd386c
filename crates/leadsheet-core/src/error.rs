//! Error types for leadsheet-core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Underlying cause carried by [`Error::UnreadableFormat`] and [`Error::WriteFailure`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in leadsheet-core
///
/// Every fallible operation fails with exactly one of these kinds.
#[derive(Debug, Error)]
pub enum Error {
    /// Input path does not exist
    #[error("file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// File exists but cannot be parsed as a spreadsheet (or job file)
    #[error("cannot read '{path}' as a spreadsheet: {message}")]
    UnreadableFormat {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Sheet has no header row
    #[error("'{path}' has no header row")]
    EmptySheet { path: PathBuf },

    /// A referenced column does not exist in the table
    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    /// Aggregate kind is not count, sum or mean
    #[error("unsupported aggregate '{0}', expected count, sum or mean")]
    UnsupportedAggregate(String),

    /// Destination could not be written
    #[error("failed to write '{path}': {message}")]
    WriteFailure {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

/// Fieldless discriminant of [`Error`], used for status codes at the FFI boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    FileNotFound,
    UnreadableFormat,
    EmptySheet,
    UnknownColumn,
    UnsupportedAggregate,
    WriteFailure,
}

impl ErrorKind {
    /// Stable numeric code (0 is reserved for success)
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::FileNotFound => 1,
            ErrorKind::UnreadableFormat => 2,
            ErrorKind::EmptySheet => 3,
            ErrorKind::UnknownColumn => 4,
            ErrorKind::UnsupportedAggregate => 5,
            ErrorKind::WriteFailure => 6,
        }
    }
}

impl Error {
    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FileNotFound { .. } => ErrorKind::FileNotFound,
            Error::UnreadableFormat { .. } => ErrorKind::UnreadableFormat,
            Error::EmptySheet { .. } => ErrorKind::EmptySheet,
            Error::UnknownColumn { .. } => ErrorKind::UnknownColumn,
            Error::UnsupportedAggregate(_) => ErrorKind::UnsupportedAggregate,
            Error::WriteFailure { .. } => ErrorKind::WriteFailure,
        }
    }

    pub(crate) fn unknown_column(column: impl Into<String>) -> Self {
        Error::UnknownColumn {
            column: column.into(),
        }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::UnreadableFormat {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Unreadable input, keeping the parser or io error as the source
    pub(crate) fn unreadable_from<E>(path: impl Into<PathBuf>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::UnreadableFormat {
            path: path.into(),
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Write failure with a plain message and no underlying cause
    pub fn write_failure(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::WriteFailure {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Write failure caused by an io, zip or serialization error
    pub fn write_failure_from<E>(path: impl Into<PathBuf>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::WriteFailure {
            path: path.into(),
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }
}
