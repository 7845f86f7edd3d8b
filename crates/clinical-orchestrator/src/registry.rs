//! Per-agent profile registry — maps each `AgentKind` to its system
//! instruction, allowed tool set, and generation defaults. Used by the turn
//! pipeline to build the `GenerationRequest` for the agent currently holding
//! the turn, and to decide what changes when the active agent switches.

use clinical_core::config::AgentModelConfig;
use clinical_core::types::AgentKind;
use clinical_model::{GenerationRequest, ToolDeclaration};

/// Static profile for one agent: its voice, its tools, its model config.
pub struct AgentProfile {
    pub kind: AgentKind,
    pub system_instruction: &'static str,
    pub tool_names: &'static [&'static str],
}

pub const AGENT_PROFILES: &[AgentProfile] = &[
    AgentProfile {
        kind: AgentKind::Socratico,
        system_instruction: SOCRATICO_INSTRUCTION,
        tool_names: &["ask_followup_question", "suggest_reflection"],
    },
    AgentProfile {
        kind: AgentKind::Clinico,
        system_instruction: CLINICO_INSTRUCTION,
        tool_names: &[
            "extract_entities",
            "flag_risk",
            "draft_clinical_note",
            "search_patient_history",
        ],
    },
    AgentProfile {
        kind: AgentKind::Academico,
        system_instruction: ACADEMICO_INSTRUCTION,
        tool_names: &["search_literature", "cite_source"],
    },
    AgentProfile {
        kind: AgentKind::Orquestador,
        system_instruction: ORQUESTADOR_INSTRUCTION,
        tool_names: &["classify_intent", "select_agent"],
    },
];

const SOCRATICO_INSTRUCTION: &str = "Eres el agente Socrático: guías la reflexión del \
clínico mediante preguntas abiertas, sin ofrecer diagnósticos ni instrucciones directas.";

const CLINICO_INSTRUCTION: &str = "Eres el agente Clínico: el camino robusto y orientado \
a seguridad. Prioriza la detección de riesgo, la precisión diagnóstica y la documentación \
clara por sobre la exploración abierta.";

const ACADEMICO_INSTRUCTION: &str = "Eres el agente Académico: fundamentas las \
intervenciones en literatura y evidencia, citando fuentes cuando sea posible.";

const ORQUESTADOR_INSTRUCTION: &str = "Eres el agente Orquestador: clasificas la intención \
del turno y decides a qué agente especializado corresponde, sin responder directamente al \
clínico salvo que se te pida explícitamente.";

/// Looks up the static profile for an agent kind. Total over `AgentKind::ALL`.
pub fn profile(kind: AgentKind) -> &'static AgentProfile {
    AGENT_PROFILES
        .iter()
        .find(|p| p.kind == kind)
        .expect("AGENT_PROFILES covers every AgentKind variant")
}

/// Builds the base generation request for `kind`, seeded with tools and
/// model defaults from `ClinicalConfig.agents`. The caller still needs to
/// push the compressed history/current message.
pub fn build_request(kind: AgentKind, model_cfg: &AgentModelConfig) -> GenerationRequest {
    let profile = profile(kind);
    let mut req = GenerationRequest::new(model_cfg.model.clone(), profile.system_instruction);
    req.temperature = model_cfg.temperature;
    req.max_output_tokens = model_cfg.max_output_tokens;
    req.tools = profile
        .tool_names
        .iter()
        .map(|name| ToolDeclaration {
            name: name.to_string(),
            description: format!("Tool `{name}` available to the {} agent.", profile.kind),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        })
        .collect();
    req
}

/// Agent registry bound to a concrete `ClinicalConfig.agents`.
pub struct AgentRegistry {
    agents: std::collections::HashMap<AgentKind, clinical_core::config::AgentModelConfig>,
}

impl AgentRegistry {
    pub fn new(config: &clinical_core::config::AgentsConfig) -> Self {
        let mut agents = std::collections::HashMap::new();
        for kind in AgentKind::ALL {
            agents.insert(kind, config.get(kind).clone());
        }
        Self { agents }
    }

    pub fn model_config(&self, kind: AgentKind) -> &AgentModelConfig {
        self.agents
            .get(&kind)
            .expect("AgentRegistry seeded from AgentsConfig covers every AgentKind")
    }

    pub fn request_for(&self, kind: AgentKind) -> GenerationRequest {
        build_request(kind, self.model_config(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_agent_kind_has_a_profile() {
        for kind in AgentKind::ALL {
            let p = profile(kind);
            assert_eq!(p.kind, kind);
            assert!(!p.tool_names.is_empty());
        }
    }

    #[test]
    fn build_request_applies_model_config() {
        let cfg = AgentModelConfig {
            model: "test-model".to_string(),
            temperature: 0.5,
            max_output_tokens: 512,
            safety_threshold: clinical_core::config::SafetyThreshold::BlockMediumAndAbove,
        };
        let req = build_request(AgentKind::Clinico, &cfg);
        assert_eq!(req.model, "test-model");
        assert_eq!(req.temperature, 0.5);
        assert_eq!(req.max_output_tokens, 512);
        assert!(!req.tools.is_empty());
    }
}
