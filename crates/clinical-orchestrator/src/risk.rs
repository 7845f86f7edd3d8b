use clinical_core::types::{RiskLevel, RiskType};
use clinical_sessions::RiskState;

const CRITICAL_KEYWORDS: &[&str] = &[
    "suicid",
    "ideación suicida",
    "quiero morir",
    "matarme",
    "quitarme la vida",
    "acabar con todo",
];

const HIGH_RISK_KEYWORDS: &[&str] = &[
    "autolesión",
    "autolesion",
    "me quiero hacer daño",
    "violencia",
    "abuso",
    "maltrato",
];

/// Outcome of a single edge-case precheck.
#[derive(Debug, Clone)]
pub struct EdgeCaseOutcome {
    pub risk_state: RiskState,
    pub force_standard_routing: bool,
    pub is_edge_case: bool,
    pub edge_case_type: Option<RiskType>,
    pub stress_signals: Vec<StressSignal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StressSignal {
    LongSession,
    LateNightSession,
    RapidSwitches,
}

/// Keyword-based pre-check plus stress-signal computation. Detection
/// is conservative: keywords alone are sufficient, no model call required.
pub struct EdgeCaseDetector {
    pub safe_turns_threshold: u32,
}

impl EdgeCaseDetector {
    pub fn new(safe_turns_threshold: u32) -> Self {
        Self { safe_turns_threshold }
    }

    /// Evaluate one turn's input text against the current risk state.
    pub fn evaluate(
        &self,
        text: &str,
        current: &RiskState,
        patient_active_risk_flag: bool,
        session_duration_minutes: u32,
        night_session_minutes: u32,
        max_session_minutes: u32,
        consecutive_switches: u32,
        max_consecutive_switches: u32,
        is_night_local_time: bool,
        detected_at: impl Into<String>,
    ) -> EdgeCaseOutcome {
        let lowered = text.to_lowercase();
        let hit_critical = CRITICAL_KEYWORDS.iter().any(|kw| lowered.contains(kw));
        let hit_high = HIGH_RISK_KEYWORDS.iter().any(|kw| lowered.contains(kw));
        let triggered = hit_critical || hit_high || patient_active_risk_flag;

        let mut stress_signals = Vec::new();
        if session_duration_minutes >= max_session_minutes {
            stress_signals.push(StressSignal::LongSession);
        }
        if is_night_local_time || session_duration_minutes >= night_session_minutes {
            stress_signals.push(StressSignal::LateNightSession);
        }
        if consecutive_switches >= max_consecutive_switches {
            stress_signals.push(StressSignal::RapidSwitches);
        }

        if triggered {
            let risk_level = if hit_critical {
                RiskLevel::Critical
            } else {
                RiskLevel::High
            };
            let risk_type = if hit_critical || hit_high {
                RiskType::Risk
            } else {
                RiskType::SensitiveContent
            };

            return EdgeCaseOutcome {
                risk_state: RiskState {
                    is_risk_session: true,
                    risk_level,
                    detected_at: Some(detected_at.into()),
                    risk_type: Some(risk_type),
                    last_risk_check: Some(chrono::Utc::now().to_rfc3339()),
                    consecutive_safe_turns: 0,
                },
                force_standard_routing: true,
                is_edge_case: true,
                edge_case_type: Some(risk_type),
                stress_signals,
            };
        }

        // Safe turn. If a risk session is active, move toward de-escalation.
        if current.is_risk_session {
            let consecutive_safe_turns = current.consecutive_safe_turns + 1;
            let is_risk_session = consecutive_safe_turns < self.safe_turns_threshold;

            return EdgeCaseOutcome {
                risk_state: RiskState {
                    is_risk_session,
                    risk_level: current.risk_level,
                    detected_at: current.detected_at.clone(),
                    risk_type: current.risk_type,
                    last_risk_check: Some(chrono::Utc::now().to_rfc3339()),
                    consecutive_safe_turns,
                },
                // Standard routing stays enforced until de-escalation completes.
                force_standard_routing: is_risk_session,
                is_edge_case: false,
                edge_case_type: None,
                stress_signals,
            };
        }

        EdgeCaseOutcome {
            risk_state: current.clone(),
            force_standard_routing: false,
            is_edge_case: false,
            edge_case_type: None,
            stress_signals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> EdgeCaseDetector {
        EdgeCaseDetector::new(3)
    }

    #[test]
    fn critical_keyword_sets_critical_risk_and_forces_standard_routing() {
        let outcome = detector().evaluate(
            "El paciente mencionó ideación suicida",
            &RiskState::default(),
            false,
            10,
            45,
            90,
            0,
            4,
            false,
            "t1",
        );
        assert!(outcome.risk_state.is_risk_session);
        assert_eq!(outcome.risk_state.risk_level, RiskLevel::Critical);
        assert_eq!(outcome.risk_state.consecutive_safe_turns, 0);
        assert!(outcome.force_standard_routing);
        assert!(outcome.is_edge_case);
    }

    #[test]
    fn safe_turn_increments_counter_until_threshold() {
        let active = RiskState {
            is_risk_session: true,
            risk_level: RiskLevel::High,
            detected_at: Some("t0".to_string()),
            risk_type: Some(RiskType::Risk),
            last_risk_check: None,
            consecutive_safe_turns: 2,
        };
        let outcome = detector().evaluate(
            "Hola, ¿cómo estás?",
            &active,
            false,
            5,
            45,
            90,
            0,
            4,
            false,
            "t1",
        );
        assert_eq!(outcome.risk_state.consecutive_safe_turns, 3);
        assert!(!outcome.risk_state.is_risk_session);
        assert!(!outcome.force_standard_routing);
    }

    #[test]
    fn safe_turn_before_threshold_keeps_forcing_standard_routing() {
        let active = RiskState {
            is_risk_session: true,
            risk_level: RiskLevel::High,
            detected_at: Some("t0".to_string()),
            risk_type: Some(RiskType::Risk),
            last_risk_check: None,
            consecutive_safe_turns: 0,
        };
        let outcome = detector().evaluate(
            "Hola", &active, false, 5, 45, 90, 0, 4, false, "t1",
        );
        assert_eq!(outcome.risk_state.consecutive_safe_turns, 1);
        assert!(outcome.risk_state.is_risk_session);
        assert!(outcome.force_standard_routing);
    }

    #[test]
    fn long_session_flags_stress_signal() {
        let outcome = detector().evaluate(
            "todo bien", &RiskState::default(), false, 95, 45, 90, 0, 4, false, "t1",
        );
        assert!(outcome.stress_signals.contains(&StressSignal::LongSession));
    }
}
