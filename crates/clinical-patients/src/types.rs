use clinical_core::PatientId;
use serde::{Deserialize, Serialize};

/// Cached narrative summary of a patient's history, versioned so callers
/// can detect staleness without a full recompute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryCache {
    pub text: String,
    pub version: u32,
    pub updated_at: String,
    pub token_count: Option<u32>,
}

/// A patient record as consumed (read-only) by the orchestration core.
/// Ownership of mutation lives outside this crate's core concern — this
/// store exists so `MetadataCollector` and `DynamicOrchestrator` have
/// something concrete to read patient context from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub display_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub summary_cache: Option<SummaryCache>,
    /// Cumulative number of sessions held with this patient, used to
    /// derive `TherapeuticPhase`.
    pub session_count: u32,
    pub last_session_date: Option<String>,
    pub treatment_modality: Option<String>,
}

impl Patient {
    pub fn new(id: PatientId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            tags: Vec::new(),
            notes: Vec::new(),
            attachments: Vec::new(),
            summary_cache: None,
            session_count: 0,
            last_session_date: None,
            treatment_modality: None,
        }
    }

    pub fn therapeutic_phase(&self) -> clinical_core::types::TherapeuticPhase {
        clinical_core::types::TherapeuticPhase::from_session_count(self.session_count)
    }
}
