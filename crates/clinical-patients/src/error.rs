use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatientError {
    #[error("patient not found: {id}")]
    NotFound { id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PatientError>;

impl From<PatientError> for clinical_core::ClinicalError {
    fn from(e: PatientError) -> Self {
        match e {
            PatientError::NotFound { id } => clinical_core::ClinicalError::NotFound(id),
            other => clinical_core::ClinicalError::Internal(other.to_string()),
        }
    }
}
