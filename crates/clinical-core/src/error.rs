use thiserror::Error;

/// Top-level error taxonomy surfaced across the orchestration core.
#[derive(Debug, Error)]
pub enum ClinicalError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("input too large: {0}")]
    InputTooLarge(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("transient error: {0}")]
    Transient(String),

    #[error("policy blocked: {0}")]
    PolicyBlocked(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClinicalError {
    /// Short error code string surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ClinicalError::NotFound(_) => "NOT_FOUND",
            ClinicalError::Conflict(_) => "CONFLICT",
            ClinicalError::InputTooLarge(_) => "INPUT_TOO_LARGE",
            ClinicalError::RateLimited { .. } => "RATE_LIMITED",
            ClinicalError::Transient(_) => "TRANSIENT",
            ClinicalError::PolicyBlocked(_) => "POLICY_BLOCKED",
            ClinicalError::Cancelled => "CANCELLED",
            ClinicalError::Config(_) => "CONFIG_ERROR",
            ClinicalError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a caller may retry this error after backing off.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ClinicalError::RateLimited { .. } | ClinicalError::Transient(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClinicalError>;
