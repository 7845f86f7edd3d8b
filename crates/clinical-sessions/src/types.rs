use clinical_core::types::{Confidentiality, RiskLevel, RiskType};
use clinical_core::{PatientId, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Mode a session was created in (therapy session type, not a UI concept).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Standard,
    Crisis,
    Supervision,
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Standard
    }
}

/// The role of a message within a session's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A single turn in a session's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Set iff `role == Role::Model`.
    pub agent: Option<String>,
    /// RFC3339 timestamp, monotonically non-decreasing within a session.
    pub timestamp: String,
    #[serde(default)]
    pub file_references: Vec<String>,
    #[serde(default)]
    pub grounding_urls: Vec<String>,
    #[serde(default)]
    pub reasoning_bullets: Vec<String>,
    /// Set when a cancelled or failed stream left this message partial.
    #[serde(default)]
    pub incomplete: bool,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            role: Role::User,
            content: content.into(),
            agent: None,
            timestamp: timestamp.into(),
            file_references: Vec::new(),
            grounding_urls: Vec::new(),
            reasoning_bullets: Vec::new(),
            incomplete: false,
        }
    }

    pub fn model(
        content: impl Into<String>,
        agent: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            role: Role::Model,
            content: content.into(),
            agent: Some(agent.into()),
            timestamp: timestamp.into(),
            file_references: Vec::new(),
            grounding_urls: Vec::new(),
            reasoning_bullets: Vec::new(),
            incomplete: false,
        }
    }
}

/// Persistent cross-turn risk tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskState {
    pub is_risk_session: bool,
    pub risk_level: RiskLevel,
    pub detected_at: Option<String>,
    pub risk_type: Option<RiskType>,
    pub last_risk_check: Option<String>,
    pub consecutive_safe_turns: u32,
}

impl Default for RiskState {
    fn default() -> Self {
        Self {
            is_risk_session: false,
            risk_level: RiskLevel::Low,
            detected_at: None,
            risk_type: None,
            last_risk_check: None,
            consecutive_safe_turns: 0,
        }
    }
}

/// Clinical framing of a session, distinct from its operational bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalContext {
    pub patient_id: Option<PatientId>,
    pub session_type: String,
    #[serde(default)]
    pub confidentiality: Confidentiality,
}

impl Default for ClinicalContext {
    fn default() -> Self {
        Self {
            patient_id: None,
            session_type: "general".to_string(),
            confidentiality: Confidentiality::default(),
        }
    }
}

/// Session-level aggregate bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub created_at: String,
    pub last_updated: String,
    pub total_tokens: u64,
    #[serde(default)]
    pub file_refs: Vec<String>,
}

/// A persisted conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub mode: SessionMode,
    pub active_agent: String,
    pub title: Option<String>,
    pub history: Vec<Message>,
    pub metadata: SessionMetadata,
    pub clinical_context: ClinicalContext,
    pub risk_state: Option<RiskState>,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        mode: SessionMode,
        active_agent: impl Into<String>,
        now: impl Into<String>,
    ) -> Self {
        let now = now.into();
        Self {
            session_id,
            user_id,
            mode,
            active_agent: active_agent.into(),
            title: None,
            history: Vec::new(),
            metadata: SessionMetadata {
                created_at: now.clone(),
                last_updated: now,
                total_tokens: 0,
                file_refs: Vec::new(),
            },
            clinical_context: ClinicalContext::default(),
            risk_state: None,
        }
    }
}
