use clinical_core::types::{Region, TherapeuticPhase, TimeOfDay};
use clinical_patients::Patient;
use clinical_sessions::Session;
use serde::{Deserialize, Serialize};

/// Temporal framing of the current turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalMetadata {
    pub timestamp_utc: String,
    pub timezone: Option<String>,
    pub local_hour: Option<u32>,
    pub region: Region,
    pub session_duration_minutes: u32,
    pub time_of_day: Option<TimeOfDay>,
}

/// Risk framing, derived from the session's `RiskState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetadata {
    pub risk_flags_active: bool,
    pub risk_level: clinical_core::types::RiskLevel,
    pub last_risk_assessment: Option<String>,
    pub requires_immediate_attention: bool,
}

/// Per-turn and windowed agent-switch bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHistoryMetadata {
    pub agent_transitions: Vec<String>,
    pub agent_turn_counts: std::collections::HashMap<String, u32>,
    pub last_agent_switch: Option<String>,
    pub consecutive_switches: u32,
}

/// Patient-linked context, degrading gracefully if the patient lookup failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientContextMetadata {
    pub patient_id: Option<String>,
    pub patient_summary_available: bool,
    pub therapeutic_phase: Option<TherapeuticPhase>,
    pub session_count: Option<u32>,
    pub last_session_date: Option<String>,
    pub treatment_modality: Option<String>,
}

/// Pure, derived operational metadata snapshot attached to a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalMetadata {
    pub temporal: TemporalMetadata,
    pub risk: RiskMetadata,
    pub agent_history: AgentHistoryMetadata,
    pub patient_context: PatientContextMetadata,
}

/// Collects operational metadata for a turn from session state and an
/// optional patient reference. A pure function: never calls out to the
/// model or network, and degrades to `None`/`unknown` fields rather than
/// failing when inputs are incomplete.
pub struct MetadataCollector {
    pub switch_window_minutes: i64,
    pub max_consecutive_switches: u32,
}

impl MetadataCollector {
    pub fn new() -> Self {
        Self {
            switch_window_minutes: clinical_core::config::SWITCH_WINDOW_MINUTES,
            max_consecutive_switches: clinical_core::config::MAX_CONSECUTIVE_SWITCHES_DEFAULT,
        }
    }

    pub fn collect(
        &self,
        session: &Session,
        patient: Option<&Patient>,
        now_utc: &str,
        timezone: Option<&str>,
        local_hour: Option<u32>,
    ) -> OperationalMetadata {
        let temporal = self.collect_temporal(session, now_utc, timezone, local_hour);
        let risk = self.collect_risk(session);
        let agent_history = self.collect_agent_history(session, now_utc);
        let patient_context = self.collect_patient_context(patient);

        OperationalMetadata {
            temporal,
            risk,
            agent_history,
            patient_context,
        }
    }

    fn collect_temporal(
        &self,
        session: &Session,
        now_utc: &str,
        timezone: Option<&str>,
        local_hour: Option<u32>,
    ) -> TemporalMetadata {
        let region = timezone.map(Region::from_timezone).unwrap_or(Region::Other);
        let time_of_day = local_hour.map(TimeOfDay::from_hour);
        let duration_minutes = session_duration_minutes(session, now_utc);

        TemporalMetadata {
            timestamp_utc: now_utc.to_string(),
            timezone: timezone.map(String::from),
            local_hour,
            region,
            session_duration_minutes: duration_minutes,
            time_of_day,
        }
    }

    fn collect_risk(&self, session: &Session) -> RiskMetadata {
        match &session.risk_state {
            Some(rs) => RiskMetadata {
                risk_flags_active: rs.is_risk_session,
                risk_level: rs.risk_level,
                last_risk_assessment: rs.last_risk_check.clone(),
                requires_immediate_attention: rs.is_risk_session
                    && rs.risk_level >= clinical_core::types::RiskLevel::High,
            },
            None => RiskMetadata {
                risk_flags_active: false,
                risk_level: clinical_core::types::RiskLevel::Low,
                last_risk_assessment: None,
                requires_immediate_attention: false,
            },
        }
    }

    fn collect_agent_history(&self, session: &Session, now_utc: &str) -> AgentHistoryMetadata {
        let now = chrono::DateTime::parse_from_rfc3339(now_utc).ok();
        let cutoff = now.map(|n| n - chrono::Duration::minutes(self.switch_window_minutes));

        let window: Vec<&clinical_sessions::Message> = match cutoff {
            Some(cutoff) => session
                .history
                .iter()
                .filter(|m| {
                    chrono::DateTime::parse_from_rfc3339(&m.timestamp)
                        .map(|t| t >= cutoff)
                        .unwrap_or(false)
                })
                .collect(),
            // Without a parseable `now`, fall back to the full history rather
            // than silently reporting an empty window.
            None => session.history.iter().collect(),
        };

        let mut transitions = Vec::new();
        let mut turn_counts: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        let mut last_agent: Option<&str> = None;
        let mut last_switch: Option<&str> = None;
        let mut consecutive_switches = 0u32;

        for m in window {
            if let Some(agent) = m.agent.as_deref() {
                *turn_counts.entry(agent.to_string()).or_insert(0) += 1;
                if let Some(prev) = last_agent {
                    if prev != agent {
                        transitions.push(format!("{prev}->{agent}"));
                        last_switch = Some(&m.timestamp);
                        consecutive_switches += 1;
                    }
                }
                last_agent = Some(agent);
            }
        }

        AgentHistoryMetadata {
            agent_transitions: transitions,
            agent_turn_counts: turn_counts,
            last_agent_switch: last_switch.map(String::from),
            consecutive_switches,
        }
    }

    fn collect_patient_context(&self, patient: Option<&Patient>) -> PatientContextMetadata {
        match patient {
            Some(p) => PatientContextMetadata {
                patient_id: Some(p.id.to_string()),
                patient_summary_available: p
                    .summary_cache
                    .as_ref()
                    .map(|s| !s.text.is_empty())
                    .unwrap_or(false),
                therapeutic_phase: Some(p.therapeutic_phase()),
                session_count: Some(p.session_count),
                last_session_date: p.last_session_date.clone(),
                treatment_modality: p.treatment_modality.clone(),
            },
            None => PatientContextMetadata {
                patient_id: None,
                patient_summary_available: false,
                therapeutic_phase: None,
                session_count: None,
                last_session_date: None,
                treatment_modality: None,
            },
        }
    }
}

impl Default for MetadataCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn session_duration_minutes(session: &Session, now_utc: &str) -> u32 {
    let created = chrono::DateTime::parse_from_rfc3339(&session.metadata.created_at).ok();
    let now = chrono::DateTime::parse_from_rfc3339(now_utc).ok();
    match (created, now) {
        (Some(c), Some(n)) => {
            let minutes = (n - c).num_minutes();
            if minutes < 0 {
                0
            } else {
                minutes as u32
            }
        }
        _ => 0,
    }
}
