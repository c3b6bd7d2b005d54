// crates/tracker/src/error.rs
use lumina_core::ValidationError;
use lumina_db::DbError;
use thiserror::Error;

/// Errors surfaced synchronously by the capture pipeline (`start`, `stop`,
/// `flush`, `record`). Remote failures never appear here; the sync worker
/// absorbs them.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackerError::from(DbError::NoCacheDir);
        assert_eq!(
            err.to_string(),
            "Storage error: Failed to determine cache directory"
        );
        let err = TrackerError::from(ValidationError::EmptyEmail);
        assert_eq!(err.to_string(), "Validation error: Email is required");
    }
}
