pub mod config;
pub mod error;
pub mod types;

pub use config::ClinicalConfig;
pub use error::{ClinicalError, Result};
pub use types::{
    AgentKind, Confidentiality, PatientId, Region, RiskLevel, RiskType, SessionId,
    TherapeuticPhase, TimeOfDay, UserId,
};
