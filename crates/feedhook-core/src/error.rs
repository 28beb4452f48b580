//! Error types for feedhook.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FeedhookError>;

/// All errors surfaced by feedhook components.
#[derive(Debug, Error)]
pub enum FeedhookError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// Upstream document could not be fetched or parsed.
    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Rejected input, e.g. an out-of-range polling interval.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FeedhookError::Validation("interval out of range".into());
        assert_eq!(err.to_string(), "Validation error: interval out of range");
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(FeedhookError::Io(_))));
    }
}
