use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("input could not be compressed under the target token budget")]
    InputTooLarge,

    #[error("model provider error: {0}")]
    Provider(#[from] clinical_model::ProviderError),

    #[error("session store error: {0}")]
    Session(#[from] clinical_sessions::SessionError),

    #[error("patient store error: {0}")]
    Patient(#[from] clinical_patients::PatientError),

    #[error("policy blocked: {0}")]
    PolicyBlocked(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl From<OrchestratorError> for clinical_core::ClinicalError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::NotFound(id) => clinical_core::ClinicalError::NotFound(id),
            OrchestratorError::InputTooLarge => {
                clinical_core::ClinicalError::InputTooLarge("context exceeds target budget".into())
            }
            OrchestratorError::Provider(p) => {
                if p.is_retriable() {
                    clinical_core::ClinicalError::Transient(p.to_string())
                } else if matches!(p, clinical_model::ProviderError::Cancelled) {
                    clinical_core::ClinicalError::Cancelled
                } else {
                    clinical_core::ClinicalError::Internal(p.to_string())
                }
            }
            OrchestratorError::Session(s) => s.into(),
            OrchestratorError::Patient(p) => p.into(),
            OrchestratorError::PolicyBlocked(m) => clinical_core::ClinicalError::PolicyBlocked(m),
            OrchestratorError::Cancelled => clinical_core::ClinicalError::Cancelled,
            OrchestratorError::Internal(m) => clinical_core::ClinicalError::Internal(m),
        }
    }
}
