use thiserror::Error;

/// Errors surfaced by `SessionStore` and `SessionManager`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {id}")]
    NotFound { id: String },

    #[error("session already exists: {id}")]
    Conflict { id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("fatal storage error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

impl From<SessionError> for clinical_core::ClinicalError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound { id } => clinical_core::ClinicalError::NotFound(id),
            SessionError::Conflict { id } => clinical_core::ClinicalError::Conflict(id),
            SessionError::Transient(msg) => clinical_core::ClinicalError::Transient(msg),
            other => clinical_core::ClinicalError::Internal(other.to_string()),
        }
    }
}
