use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ClinicalError, Result};

// Fixed constants of the routing/risk state machine — not configurable,
// not deployment knobs.
pub const SAFE_TURNS_THRESHOLD_DEFAULT: u32 = 3;
pub const MAX_CONSECUTIVE_SWITCHES_DEFAULT: u32 = 4;
pub const SWITCH_WINDOW_MINUTES: i64 = 5;
pub const DOMINANT_TOPIC_WINDOW_TURNS: u32 = 5;
pub const TOOL_CONTINUITY_LOOKBACK_TURNS: u32 = 3;
pub const SESSION_TOOL_BUDGET: usize = 20;
pub const HYBRID_TOOL_CAP: usize = 8;
pub const ENTITY_CONFIDENCE_THRESHOLD_DEFAULT: f64 = 0.7;
pub const ENTITY_DICTIONARY_BYPASS_CONFIDENCE: f64 = 0.9;

/// Top-level configuration (`clinical.toml` + `CLINICAL_*` env overrides).
///
/// TOML file merged with prefixed environment variables via `figment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalConfig {
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub context_window: ContextWindowConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for ClinicalConfig {
    fn default() -> Self {
        Self {
            orchestration: OrchestrationConfig::default(),
            context_window: ContextWindowConfig::default(),
            routing: RoutingConfig::default(),
            risk: RiskConfig::default(),
            agents: AgentsConfig::default(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ClinicalConfig {
    /// Load config from a TOML file with `CLINICAL_*` env var overrides.
    ///
    /// Checks, in order: explicit path argument, `CLINICAL_CONFIG` env var,
    /// `~/.clinical/clinical.toml`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CLINICAL_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: ClinicalConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CLINICAL_").split("__"))
            .extract()
            .map_err(|e| ClinicalError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.clinical/clinical.toml")
}

/// `USE_ADVANCED_ORCHESTRATION` toggle (picks the dynamic tool-aware
/// orchestrator vs. the baseline intent router when not forced).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default = "bool_true")]
    pub use_advanced_orchestration: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            use_advanced_orchestration: true,
        }
    }
}

/// Context compression knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindowConfig {
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: usize,
    #[serde(default = "default_trigger_tokens")]
    pub trigger_tokens: usize,
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_initial_framing")]
    pub initial_framing_messages: usize,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            max_exchanges: default_max_exchanges(),
            trigger_tokens: default_trigger_tokens(),
            target_tokens: default_target_tokens(),
            initial_framing_messages: default_initial_framing(),
        }
    }
}

fn default_max_exchanges() -> usize {
    6
}
fn default_trigger_tokens() -> usize {
    50_000
}
fn default_target_tokens() -> usize {
    30_000
}
fn default_initial_framing() -> usize {
    4
}

/// Intent routing confidence bands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_confidence_high")]
    pub confidence_high: f64,
    #[serde(default = "default_confidence_low")]
    pub confidence_low: f64,
    #[serde(default = "default_max_consecutive_switches")]
    pub max_consecutive_switches: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            confidence_high: default_confidence_high(),
            confidence_low: default_confidence_low(),
            max_consecutive_switches: default_max_consecutive_switches(),
        }
    }
}

fn default_confidence_high() -> f64 {
    0.75
}
fn default_confidence_low() -> f64 {
    0.50
}
fn default_max_consecutive_switches() -> u32 {
    MAX_CONSECUTIVE_SWITCHES_DEFAULT
}

/// Risk escalation/de-escalation knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_safe_turns_threshold")]
    pub safe_turns_threshold: u32,
    #[serde(default = "default_night_session_minutes")]
    pub night_session_minutes: u32,
    #[serde(default = "default_max_session_minutes")]
    pub max_session_minutes: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            safe_turns_threshold: default_safe_turns_threshold(),
            night_session_minutes: default_night_session_minutes(),
            max_session_minutes: default_max_session_minutes(),
        }
    }
}

fn default_safe_turns_threshold() -> u32 {
    SAFE_TURNS_THRESHOLD_DEFAULT
}
fn default_night_session_minutes() -> u32 {
    45
}
fn default_max_session_minutes() -> u32 {
    90
}

/// Fixed safety threshold applied across the four harm categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyThreshold {
    BlockMediumAndAbove,
}

impl Default for SafetyThreshold {
    fn default() -> Self {
        SafetyThreshold::BlockMediumAndAbove
    }
}

/// Per-agent model id and generation defaults, keyed by `AgentKind::as_str()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentModelConfig {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub safety_threshold: SafetyThreshold,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    pub socratico: AgentModelConfig,
    pub clinico: AgentModelConfig,
    pub academico: AgentModelConfig,
    pub orquestador: AgentModelConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        // The source material uses `gemini-2.5-flash-lite` in some call
        // sites and `gemini-2.5-flash` in others with no stated rule for
        // which agent gets which. We default every
        // agent to the flash-lite tier and let deployments override the
        // safety-critical `clinico` path to the heavier model explicitly.
        Self {
            socratico: AgentModelConfig {
                model: "gemini-2.5-flash-lite".to_string(),
                temperature: 0.8,
                max_output_tokens: 2048,
                safety_threshold: SafetyThreshold::BlockMediumAndAbove,
            },
            clinico: AgentModelConfig {
                model: "gemini-2.5-flash".to_string(),
                temperature: 0.3,
                max_output_tokens: 4096,
                safety_threshold: SafetyThreshold::BlockMediumAndAbove,
            },
            academico: AgentModelConfig {
                model: "gemini-2.5-flash".to_string(),
                temperature: 0.4,
                max_output_tokens: 4096,
                safety_threshold: SafetyThreshold::BlockMediumAndAbove,
            },
            orquestador: AgentModelConfig {
                model: "gemini-2.5-flash-lite".to_string(),
                temperature: 0.2,
                max_output_tokens: 1024,
                safety_threshold: SafetyThreshold::BlockMediumAndAbove,
            },
        }
    }
}

impl AgentsConfig {
    pub fn get(&self, agent: crate::types::AgentKind) -> &AgentModelConfig {
        use crate::types::AgentKind;
        match agent {
            AgentKind::Socratico => &self.socratico,
            AgentKind::Clinico => &self.clinico,
            AgentKind::Academico => &self.academico,
            AgentKind::Orquestador => &self.orquestador,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.clinical/clinical.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    8080
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_serde() {
        let cfg = ClinicalConfig::default();
        let json = serde_json::to_string(&cfg).expect("serialize");
        let back: ClinicalConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.context_window.max_exchanges, cfg.context_window.max_exchanges);
        assert_eq!(back.risk.safe_turns_threshold, SAFE_TURNS_THRESHOLD_DEFAULT);
    }
}
