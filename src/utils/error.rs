//! Error Handling Module
//!
//! Defines the error kinds surfaced by a cross-validation run.
//! None of them are recovered locally: the first error aborts the current fold.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for scene_transfer operations
#[derive(Error, Debug)]
pub enum SceneError {
    /// The metadata store could not be opened or the fold query failed
    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(String),

    /// A metadata row or export file is missing or malformed
    #[error("Malformed metadata: {0}")]
    MetadataFormat(String),

    /// An image referenced by the metadata does not exist under the dataset root
    #[error("Image not found: {0}")]
    FileNotFound(PathBuf),

    /// An image exists but could not be decoded
    #[error("Failed to decode image at '{0}': {1}")]
    Decode(PathBuf, String),

    /// Weight file missing, corrupt or architecturally incompatible
    #[error("Failed to load weights: {0}")]
    Load(String),

    /// Numeric failure during a forward or backward pass
    #[error("Compute error: {0}")]
    Compute(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for SceneError {
    fn from(err: rusqlite::Error) -> Self {
        SceneError::StoreUnavailable(err.to_string())
    }
}

impl From<csv::Error> for SceneError {
    fn from(err: csv::Error) -> Self {
        SceneError::MetadataFormat(err.to_string())
    }
}

/// Convenience Result type for scene_transfer operations
pub type Result<T> = std::result::Result<T, SceneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SceneError::MetadataFormat("missing column".to_string());
        assert_eq!(format!("{}", err), "Malformed metadata: missing column");
    }

    #[test]
    fn test_decode_error_mentions_path() {
        let path = PathBuf::from("/data/airport/airport_001.jpg");
        let err = SceneError::Decode(path, "unexpected EOF".to_string());
        assert!(format!("{}", err).contains("airport_001.jpg"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SceneError = io_err.into();
        assert!(matches!(err, SceneError::Io(_)));
    }

    #[test]
    fn test_sqlite_error_is_store_unavailable() {
        let err: SceneError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, SceneError::StoreUnavailable(_)));
    }
}
