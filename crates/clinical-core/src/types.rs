use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique session identifier (UUIDv7 — time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the clinician/end-user who owns a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a patient record (owned externally, referenced by sessions).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatientId(pub String);

impl PatientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PatientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PatientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The four specialized clinical agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Reflective supervisor — Socratic exploration.
    Socratico,
    /// Documentation and the robust/safety-critical path.
    Clinico,
    /// Academic/research validation.
    Academico,
    /// Meta-orchestration agent.
    Orquestador,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Socratico,
        AgentKind::Clinico,
        AgentKind::Academico,
        AgentKind::Orquestador,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Socratico => "socratico",
            AgentKind::Clinico => "clinico",
            AgentKind::Academico => "academico",
            AgentKind::Orquestador => "orquestador",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "socratico" => Ok(AgentKind::Socratico),
            "clinico" => Ok(AgentKind::Clinico),
            "academico" => Ok(AgentKind::Academico),
            "orquestador" => Ok(AgentKind::Orquestador),
            other => Err(format!("unknown agent: {other}")),
        }
    }
}

/// Severity of a detected edge case / risk session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// What kind of edge case was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskType {
    Risk,
    Stress,
    SensitiveContent,
}

/// Confidentiality tier carried by a session's clinical context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidentiality {
    #[default]
    High,
    Medium,
    Low,
}

/// Coarse geographic region, derived from a timezone prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Latam,
    Eu,
    Us,
    Asia,
    Other,
}

impl Region {
    /// Classify an IANA timezone string into a coarse region bucket.
    pub fn from_timezone(tz: &str) -> Self {
        let prefix = tz.split('/').next().unwrap_or(tz);
        match prefix {
            "America" => {
                if tz.starts_with("America/Argentina")
                    || tz.starts_with("America/Mexico")
                    || tz.starts_with("America/Bogota")
                    || tz.starts_with("America/Santiago")
                    || tz.starts_with("America/Lima")
                    || tz.starts_with("America/Sao_Paulo")
                    || tz.starts_with("America/Montevideo")
                {
                    Region::Latam
                } else {
                    Region::Us
                }
            }
            "Europe" => Region::Eu,
            "Asia" => Region::Asia,
            _ => Region::Other,
        }
    }
}

/// Bucket of local time-of-day, used for temporal metadata and stress signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Classify a 0-23 local hour into a time-of-day bucket.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            18..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }
}

/// Therapeutic phase, derived from cumulative session count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TherapeuticPhase {
    Assessment,
    Intervention,
    Maintenance,
    Closure,
}

impl TherapeuticPhase {
    pub fn from_session_count(count: u32) -> Self {
        match count {
            0..=3 => TherapeuticPhase::Assessment,
            4..=12 => TherapeuticPhase::Intervention,
            13..=24 => TherapeuticPhase::Maintenance,
            _ => TherapeuticPhase::Closure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_from_timezone_buckets_correctly() {
        assert_eq!(Region::from_timezone("America/Argentina/Buenos_Aires"), Region::Latam);
        assert_eq!(Region::from_timezone("America/New_York"), Region::Us);
        assert_eq!(Region::from_timezone("Europe/Madrid"), Region::Eu);
        assert_eq!(Region::from_timezone("Asia/Tokyo"), Region::Asia);
        assert_eq!(Region::from_timezone("Pacific/Auckland"), Region::Other);
    }

    #[test]
    fn time_of_day_buckets_cover_all_hours() {
        assert_eq!(TimeOfDay::from_hour(7), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(14), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(20), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(2), TimeOfDay::Night);
    }

    #[test]
    fn therapeutic_phase_thresholds() {
        assert_eq!(TherapeuticPhase::from_session_count(0), TherapeuticPhase::Assessment);
        assert_eq!(TherapeuticPhase::from_session_count(3), TherapeuticPhase::Assessment);
        assert_eq!(TherapeuticPhase::from_session_count(4), TherapeuticPhase::Intervention);
        assert_eq!(TherapeuticPhase::from_session_count(12), TherapeuticPhase::Intervention);
        assert_eq!(TherapeuticPhase::from_session_count(13), TherapeuticPhase::Maintenance);
        assert_eq!(TherapeuticPhase::from_session_count(24), TherapeuticPhase::Maintenance);
        assert_eq!(TherapeuticPhase::from_session_count(25), TherapeuticPhase::Closure);
    }
}
