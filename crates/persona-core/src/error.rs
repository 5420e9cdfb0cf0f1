//! Error types for persona-engine.

use thiserror::Error;

/// Result type alias using persona-engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for persona-engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Reclassification job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Contact not found
    #[error("Contact not found: {0}")]
    ContactNotFound(uuid::Uuid),

    /// Classification failed (catalog problems, not input problems)
    #[error("Classification error: {0}")]
    Classification(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("keyword".to_string());
        assert_eq!(err.to_string(), "Not found: keyword");
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::nil();
        let err = Error::JobNotFound(id);
        assert_eq!(err.to_string(), format!("Job not found: {}", id));
    }

    #[test]
    fn test_error_display_contact_not_found() {
        let id = Uuid::new_v4();
        let err = Error::ContactNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_error_display_classification() {
        let err = Error::Classification("no default persona".to_string());
        assert_eq!(err.to_string(), "Classification error: no default persona");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing DATABASE_URL".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing DATABASE_URL");
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("empty keyword list".to_string());
        assert_eq!(err.to_string(), "Invalid input: empty keyword list");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_result_type_ok() {
        fn get_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(get_result().unwrap(), 42);
    }
}
