use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for fieldsnap operations
pub type Result<T> = std::result::Result<T, SnapError>;

/// Unified error type for all fieldsnap operations
#[derive(Debug, Error)]
pub enum SnapError {
    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Archive / snapshot format errors
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("{path} is {size} bytes, limit is {limit}")]
    SizeExceeded { path: String, size: u64, limit: u64 },

    #[error("Hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    // Operation outcome errors
    #[error("Partial failure: {succeeded} succeeded, {failed} failed")]
    PartialFailure { succeeded: usize, failed: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Restore failed at table {table} after applying {applied_tables:?}: {message}")]
    RestoreFailed {
        table: String,
        applied_tables: Vec<String>,
        message: String,
    },

    #[error("Record sink error: {0}")]
    Sink(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("I/O error on {}: {source}", path.display())]
    PathIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SnapError {
    /// Attach the path an I/O error happened on
    pub fn at_path(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SnapError::PathIo {
            path: path.into(),
            source,
        }
    }

    /// True for errors that mean the target was absent rather than broken
    pub fn is_not_found(&self) -> bool {
        match self {
            SnapError::NotFound(_) => true,
            SnapError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            SnapError::PathIo { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<zip::result::ZipError> for SnapError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => SnapError::Io(e),
            zip::result::ZipError::FileNotFound => {
                SnapError::NotFound("entry not found in archive".to_string())
            }
            other => SnapError::Corrupt(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for SnapError {
    fn from(err: toml::de::Error) -> Self {
        SnapError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SnapError {
    fn from(err: toml::ser::Error) -> Self {
        SnapError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_io_maps_to_io() {
        let err: SnapError =
            zip::result::ZipError::Io(io::Error::new(io::ErrorKind::Other, "disk")).into();
        assert!(matches!(err, SnapError::Io(_)));
    }

    #[test]
    fn test_zip_format_maps_to_corrupt() {
        let err: SnapError = zip::result::ZipError::InvalidArchive("bad header".into()).into();
        assert!(matches!(err, SnapError::Corrupt(_)));
    }

    #[test]
    fn test_is_not_found() {
        assert!(SnapError::NotFound("x".into()).is_not_found());
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(SnapError::at_path("/tmp/x", io_err).is_not_found());
        assert!(!SnapError::Cancelled.is_not_found());
    }
}
