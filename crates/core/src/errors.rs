use std::path::PathBuf;

/// Result type alias for strand operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for strand storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine failed to read or write (I/O, internal failure, rejected input)
    #[error("storage {operation} failed: {message}")]
    Storage {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation on a store that has been closed
    #[error("store is closed: cannot {operation}")]
    Closed { operation: String },

    /// Absence surfaced as an error where an API chooses to do so
    #[error("key not found: {}", display_key(.key))]
    NotFound { key: Vec<u8> },

    /// The next change cannot be applied or served without skipping a change number
    #[error("replication gap: expected change {expected}, found {found}")]
    ReplicationGap { expected: u64, found: u64 },

    /// Backup path unreadable, corrupt or incompatible
    #[error("restore from '{path}' failed: {message}")]
    Restore {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding of persisted structures
    #[error("failed to {operation} {subject}: {message}")]
    Serialization {
        operation: &'static str,
        subject: String,
        message: String,
    },
}

/// The contract-level classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Storage,
    Closed,
    NotFound,
    ReplicationGap,
    Restore,
    Configuration,
}

fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::FileSystem {
            path: PathBuf::new(),
            operation: "unknown".to_string(),
            source: error,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serialization {
            operation: "decode",
            subject: "JSON document".to_string(),
            message: error.to_string(),
        }
    }
}

impl Error {
    /// Create a storage error without an underlying cause
    #[must_use]
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Storage {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error wrapping an underlying cause
    pub fn storage_with_source<E>(
        operation: impl Into<String>,
        message: impl Into<String>,
        source: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Storage {
            operation: operation.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn closed(operation: impl Into<String>) -> Self {
        Error::Closed {
            operation: operation.into(),
        }
    }

    #[must_use]
    pub fn not_found(key: impl Into<Vec<u8>>) -> Self {
        Error::NotFound { key: key.into() }
    }

    #[must_use]
    pub fn replication_gap(expected: u64, found: u64) -> Self {
        Error::ReplicationGap { expected, found }
    }

    /// Create a restore error for the given backup path
    #[must_use]
    pub fn restore(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Restore {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap any error raised while restoring from `path`
    #[must_use]
    pub fn restore_from(path: impl Into<PathBuf>, source: Error) -> Self {
        match source {
            restore @ Error::Restore { .. } => restore,
            other => Error::Restore {
                path: path.into(),
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create a file system error with path context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    #[must_use]
    pub fn serialization(
        operation: &'static str,
        subject: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Error::Serialization {
            operation,
            subject: subject.into(),
            message: message.to_string(),
        }
    }

    /// Classify this error into one of the contract error kinds
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::Storage { .. } | Error::FileSystem { .. } | Error::Serialization { .. } => {
                ErrorKind::Storage
            }
            Error::Closed { .. } => ErrorKind::Closed,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::ReplicationGap { .. } => ErrorKind::ReplicationGap,
            Error::Restore { .. } => ErrorKind::Restore,
            Error::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Error::Closed { .. })
    }
}
