//! Baseline intent classification and precedence resolution. Decides
//! which agent handles a turn when the dynamic orchestrator is not
//! active, or as its fallback when confidence is too low to lock in a tool
//! plan.

use clinical_core::types::{AgentKind, RiskLevel, TherapeuticPhase};

use crate::entities::ExtractionResult;
use crate::metadata::OperationalMetadata;
use crate::risk::EdgeCaseOutcome;

/// Why the router landed on a given agent — surfaced to callers/telemetry,
/// never to the clinician directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingReason {
    CriticalRiskOverride,
    HighRiskOverride,
    SensitiveContentForcedStandard,
    ActiveRiskLowSafeTurns,
    ExplicitSwitchRequest,
    StabilityOverrideFrequentSwitches,
    PhaseHintTieBreaker,
    ClassifiedHighConfidence,
    ClassifiedLowConfidenceDefault,
    AmbiguousResolvedByEntities,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub agent: AgentKind,
    pub confidence: f64,
    pub reason: RoutingReason,
    pub is_edge_case: bool,
    pub edge_case_type: Option<clinical_core::types::RiskType>,
    /// When set, the turn's user message should not be persisted verbatim —
    /// it is an explicit switch request, not clinical content.
    pub suppress_user_message_persistence: bool,
    /// When set, the caller should surface a confirmation prompt rather than
    /// silently switching.
    pub requires_confirmation: bool,
}

/// Intent classification input — whatever the turn pipeline already has in
/// hand before calling into routing, so this function stays pure and testable.
pub struct RoutingInput<'a> {
    pub user_message: &'a str,
    pub previous_agent: AgentKind,
    pub edge_case: &'a EdgeCaseOutcome,
    pub metadata: &'a OperationalMetadata,
    pub entities: Option<&'a ExtractionResult>,
    pub explicit_switch_target: Option<AgentKind>,
    pub classifier_scores: &'a [(AgentKind, f64)],
}

pub struct IntentRouter {
    pub confidence_high: f64,
    pub confidence_low: f64,
    pub max_consecutive_switches: u32,
}

impl IntentRouter {
    pub fn new(confidence_high: f64, confidence_low: f64, max_consecutive_switches: u32) -> Self {
        Self {
            confidence_high,
            confidence_low,
            max_consecutive_switches,
        }
    }

    /// Resolve the six-level precedence ladder, highest first.
    pub fn route(&self, input: &RoutingInput) -> RoutingDecision {
        // 1. Critical/high risk override → clinico, regardless of anything else.
        if input.edge_case.risk_state.is_risk_session {
            let reason = match input.edge_case.risk_state.risk_level {
                RiskLevel::Critical => RoutingReason::CriticalRiskOverride,
                RiskLevel::High => RoutingReason::HighRiskOverride,
                _ => RoutingReason::ActiveRiskLowSafeTurns,
            };
            let is_hard_override = matches!(
                input.edge_case.risk_state.risk_level,
                RiskLevel::Critical | RiskLevel::High
            );
            if is_hard_override {
                return RoutingDecision {
                    agent: AgentKind::Clinico,
                    confidence: 1.0,
                    reason,
                    is_edge_case: true,
                    edge_case_type: input.edge_case.edge_case_type,
                    suppress_user_message_persistence: false,
                    requires_confirmation: false,
                };
            }
        }

        // 2. Sensitive content / active-risk-with-low-safe-turns → forced
        // standard routing + clinico.
        if input.edge_case.force_standard_routing {
            return RoutingDecision {
                agent: AgentKind::Clinico,
                confidence: 0.95,
                reason: RoutingReason::SensitiveContentForcedStandard,
                is_edge_case: input.edge_case.is_edge_case,
                edge_case_type: input.edge_case.edge_case_type,
                suppress_user_message_persistence: false,
                requires_confirmation: false,
            };
        }

        // 3. Explicit switch request → target agent + confirmation, no
        // user-message persistence (the message was a command, not content).
        if let Some(target) = input.explicit_switch_target {
            return RoutingDecision {
                agent: target,
                confidence: 1.0,
                reason: RoutingReason::ExplicitSwitchRequest,
                is_edge_case: false,
                edge_case_type: None,
                suppress_user_message_persistence: true,
                requires_confirmation: true,
            };
        }

        // 4. Stability override — too many switches in the trailing window,
        // stay put rather than thrash.
        if input.metadata.agent_history.consecutive_switches >= self.max_consecutive_switches {
            return RoutingDecision {
                agent: input.previous_agent,
                confidence: 0.9,
                reason: RoutingReason::StabilityOverrideFrequentSwitches,
                is_edge_case: false,
                edge_case_type: None,
                suppress_user_message_persistence: false,
                requires_confirmation: false,
            };
        }

        // 5/6. Normal classification, with phase hints as a tie-breaker and
        // entity presence resolving ambiguous bands.
        self.classify(input)
    }

    fn classify(&self, input: &RoutingInput) -> RoutingDecision {
        if input.classifier_scores.is_empty() {
            return RoutingDecision {
                agent: input.previous_agent,
                confidence: 0.0,
                reason: RoutingReason::ClassifiedLowConfidenceDefault,
                is_edge_case: false,
                edge_case_type: None,
                suppress_user_message_persistence: false,
                requires_confirmation: false,
            };
        }

        let mut sorted: Vec<(AgentKind, f64)> = input.classifier_scores.to_vec();
        sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let (top_agent, top_score) = sorted[0];

        if top_score >= self.confidence_high {
            return RoutingDecision {
                agent: top_agent,
                confidence: top_score,
                reason: RoutingReason::ClassifiedHighConfidence,
                is_edge_case: false,
                edge_case_type: None,
                suppress_user_message_persistence: false,
                requires_confirmation: false,
            };
        }

        if top_score <= self.confidence_low {
            // Low confidence: prefer a phase hint before giving up to the
            // default, since phase carries real signal about session stage.
            if let Some(phase_agent) = phase_hint(input.metadata) {
                return RoutingDecision {
                    agent: phase_agent,
                    confidence: top_score,
                    reason: RoutingReason::PhaseHintTieBreaker,
                    is_edge_case: false,
                    edge_case_type: None,
                    suppress_user_message_persistence: false,
                    requires_confirmation: false,
                };
            }
            return RoutingDecision {
                agent: input.previous_agent,
                confidence: top_score,
                reason: RoutingReason::ClassifiedLowConfidenceDefault,
                is_edge_case: false,
                edge_case_type: None,
                suppress_user_message_persistence: false,
                requires_confirmation: false,
            };
        }

        // Ambiguous band: resolve with extracted entities if available,
        // otherwise fall back to the phase hint, otherwise top classifier score.
        if let Some(entities) = input.entities {
            if let Some(entity_agent) = agent_from_entities(entities) {
                return RoutingDecision {
                    agent: entity_agent,
                    confidence: top_score,
                    reason: RoutingReason::AmbiguousResolvedByEntities,
                    is_edge_case: false,
                    edge_case_type: None,
                    suppress_user_message_persistence: false,
                    requires_confirmation: false,
                };
            }
        }

        if let Some(phase_agent) = phase_hint(input.metadata) {
            return RoutingDecision {
                agent: phase_agent,
                confidence: top_score,
                reason: RoutingReason::PhaseHintTieBreaker,
                is_edge_case: false,
                edge_case_type: None,
                suppress_user_message_persistence: false,
                requires_confirmation: false,
            };
        }

        RoutingDecision {
            agent: top_agent,
            confidence: top_score,
            reason: RoutingReason::ClassifiedHighConfidence,
            is_edge_case: false,
            edge_case_type: None,
            suppress_user_message_persistence: false,
            requires_confirmation: false,
        }
    }
}

fn phase_hint(metadata: &OperationalMetadata) -> Option<AgentKind> {
    match metadata.patient_context.therapeutic_phase? {
        TherapeuticPhase::Assessment => Some(AgentKind::Socratico),
        TherapeuticPhase::Intervention => Some(AgentKind::Socratico),
        TherapeuticPhase::Maintenance => Some(AgentKind::Socratico),
        TherapeuticPhase::Closure => Some(AgentKind::Clinico),
    }
}

fn agent_from_entities(entities: &ExtractionResult) -> Option<AgentKind> {
    use crate::entities::EntityType;
    let top = entities
        .primary_entities
        .first()
        .or_else(|| entities.entities.first())?;
    Some(match top.entity_type {
        EntityType::TherapeuticTechnique | EntityType::SocraticExploration => {
            AgentKind::Socratico
        }
        EntityType::DisorderCondition
        | EntityType::DocumentationProcess
        | EntityType::ClinicalConcept => AgentKind::Clinico,
        EntityType::AcademicValidation | EntityType::TargetPopulation => AgentKind::Academico,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::EdgeCaseOutcome;
    use clinical_sessions::RiskState;

    fn safe_edge_case() -> EdgeCaseOutcome {
        EdgeCaseOutcome {
            risk_state: RiskState::default(),
            force_standard_routing: false,
            is_edge_case: false,
            edge_case_type: None,
            stress_signals: Vec::new(),
        }
    }

    fn empty_metadata() -> OperationalMetadata {
        OperationalMetadata {
            temporal: crate::metadata::TemporalMetadata {
                timestamp_utc: "2026-08-01T10:00:00Z".to_string(),
                timezone: None,
                local_hour: None,
                region: clinical_core::types::Region::Other,
                session_duration_minutes: 0,
                time_of_day: None,
            },
            risk: crate::metadata::RiskMetadata {
                risk_flags_active: false,
                risk_level: RiskLevel::Low,
                last_risk_assessment: None,
                requires_immediate_attention: false,
            },
            agent_history: crate::metadata::AgentHistoryMetadata {
                agent_transitions: Vec::new(),
                agent_turn_counts: std::collections::HashMap::new(),
                last_agent_switch: None,
                consecutive_switches: 0,
            },
            patient_context: crate::metadata::PatientContextMetadata {
                patient_id: None,
                patient_summary_available: false,
                therapeutic_phase: None,
                session_count: None,
                last_session_date: None,
                treatment_modality: None,
            },
        }
    }

    #[test]
    fn critical_risk_overrides_everything() {
        let router = IntentRouter::new(0.75, 0.50, 4);
        let mut edge_case = safe_edge_case();
        edge_case.risk_state.is_risk_session = true;
        edge_case.risk_state.risk_level = RiskLevel::Critical;
        edge_case.force_standard_routing = true;

        let metadata = empty_metadata();
        let input = RoutingInput {
            user_message: "ideación suicida",
            previous_agent: AgentKind::Socratico,
            edge_case: &edge_case,
            metadata: &metadata,
            entities: None,
            explicit_switch_target: None,
            classifier_scores: &[(AgentKind::Academico, 0.99)],
        };
        let decision = router.route(&input);
        assert_eq!(decision.agent, AgentKind::Clinico);
        assert_eq!(decision.reason, RoutingReason::CriticalRiskOverride);
    }

    #[test]
    fn explicit_switch_suppresses_persistence_and_requires_confirmation() {
        let router = IntentRouter::new(0.75, 0.50, 4);
        let edge_case = safe_edge_case();
        let metadata = empty_metadata();
        let input = RoutingInput {
            user_message: "cambia a académico",
            previous_agent: AgentKind::Socratico,
            edge_case: &edge_case,
            metadata: &metadata,
            entities: None,
            explicit_switch_target: Some(AgentKind::Academico),
            classifier_scores: &[],
        };
        let decision = router.route(&input);
        assert_eq!(decision.agent, AgentKind::Academico);
        assert!(decision.suppress_user_message_persistence);
        assert!(decision.requires_confirmation);
    }

    #[test]
    fn stability_override_keeps_previous_agent() {
        let router = IntentRouter::new(0.75, 0.50, 4);
        let edge_case = safe_edge_case();
        let mut metadata = empty_metadata();
        metadata.agent_history.consecutive_switches = 5;
        let input = RoutingInput {
            user_message: "algo",
            previous_agent: AgentKind::Socratico,
            edge_case: &edge_case,
            metadata: &metadata,
            entities: None,
            explicit_switch_target: None,
            classifier_scores: &[(AgentKind::Academico, 0.99)],
        };
        let decision = router.route(&input);
        assert_eq!(decision.agent, AgentKind::Socratico);
        assert_eq!(
            decision.reason,
            RoutingReason::StabilityOverrideFrequentSwitches
        );
    }

    #[test]
    fn high_confidence_classification_wins() {
        let router = IntentRouter::new(0.75, 0.50, 4);
        let edge_case = safe_edge_case();
        let metadata = empty_metadata();
        let input = RoutingInput {
            user_message: "algo",
            previous_agent: AgentKind::Socratico,
            edge_case: &edge_case,
            metadata: &metadata,
            entities: None,
            explicit_switch_target: None,
            classifier_scores: &[(AgentKind::Clinico, 0.9), (AgentKind::Academico, 0.1)],
        };
        let decision = router.route(&input);
        assert_eq!(decision.agent, AgentKind::Clinico);
        assert_eq!(decision.reason, RoutingReason::ClassifiedHighConfidence);
    }

    #[test]
    fn phase_hint_points_assessment_to_socratico_and_closure_to_clinico() {
        let mut metadata = empty_metadata();
        metadata.patient_context.therapeutic_phase = Some(TherapeuticPhase::Assessment);
        assert_eq!(phase_hint(&metadata), Some(AgentKind::Socratico));

        metadata.patient_context.therapeutic_phase = Some(TherapeuticPhase::Closure);
        assert_eq!(phase_hint(&metadata), Some(AgentKind::Clinico));
    }
}
