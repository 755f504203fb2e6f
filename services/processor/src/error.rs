use thiserror::Error;

/// Errors surfaced by the ingestion and query pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// A required upload group was not provided
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Correlated upload groups differ in length
    #[error("Mismatch between number of {group} files ({actual}) and video files ({expected})")]
    GroupCountMismatch {
        group: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Malformed or missing request input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request body exceeds the configured upload limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Telemetry payload could not be decoded
    #[error("Invalid JSON data: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Referenced record or media is absent
    #[error("{0} not found")]
    NotFound(String),

    /// Resolved path escapes its storage root
    #[error("Access denied")]
    AccessDenied,

    /// Store read or write failure
    #[error("Database error: {0}")]
    Persistence(#[source] sqlx::Error),

    /// File save or open failure
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        // 23505: unique_violation
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some("23505") {
                return Error::Validation("A record with this id already exists".to_string());
            }
        }
        Error::Persistence(err)
    }
}
