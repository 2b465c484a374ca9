//! Error types for the loading cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// No cached value exists and no loader was available
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The supplied or default loader failed
    #[error("Loader failed: {0}")]
    LoaderFailure(anyhow::Error),

    /// The caller cancelled the operation before the value was loaded
    #[error("Load cancelled: {0}")]
    Cancelled(String),

    /// The cache has been disposed
    #[error("Cache disposed")]
    Disposed,
}

impl CacheError {
    /// Returns true if this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::NotFound("\"a\"".to_string());
        assert_eq!(err.to_string(), "Key not found: \"a\"");

        let err = CacheError::LoaderFailure(anyhow::anyhow!("backend down"));
        assert_eq!(err.to_string(), "Loader failed: backend down");
        assert!(!err.is_not_found());
    }
}
