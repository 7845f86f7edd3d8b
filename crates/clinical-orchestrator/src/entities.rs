use std::collections::HashMap;
use std::time::Duration;

use clinical_model::{GenerationRequest, ModelClient, ModelMessage, ToolDeclaration};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// The clinical entity taxonomy this extractor recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    TherapeuticTechnique,
    TargetPopulation,
    DisorderCondition,
    DocumentationProcess,
    AcademicValidation,
    SocraticExploration,
    ClinicalConcept,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,
    pub value: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub primary_entities: Vec<Entity>,
    pub secondary_entities: Vec<Entity>,
    pub confidence: f64,
    pub processing_time: Duration,
}

/// Bounded input slice fed to the model — large turns are truncated before
/// the extraction call rather than risking a context-too-large failure on
/// what is only a routing signal.
const MAX_EXTRACTION_INPUT_CHARS: usize = 4000;
const PRIMARY_CONFIDENCE_CUTOFF: f64 = 0.85;

/// Extracts clinical entities from user text via function-calling.
pub struct EntityExtractor<C: ModelClient> {
    client: std::sync::Arc<C>,
    model: String,
    confidence_threshold: f64,
    known_entities: HashMap<EntityType, Vec<String>>,
}

impl<C: ModelClient> EntityExtractor<C> {
    pub fn new(client: std::sync::Arc<C>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            confidence_threshold: clinical_core::config::ENTITY_CONFIDENCE_THRESHOLD_DEFAULT,
            known_entities: default_dictionaries(),
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub async fn extract(&self, text: &str) -> Result<ExtractionResult> {
        let started = std::time::Instant::now();
        let truncated = truncate_bounded(text, MAX_EXTRACTION_INPUT_CHARS);

        let mut req = GenerationRequest::new(&self.model, ENTITY_SYSTEM_INSTRUCTION);
        req.messages.push(ModelMessage::user(truncated));
        req.tools.push(extraction_tool_declaration());
        req.temperature = 0.0;
        req.max_output_tokens = 1024;

        let resp = self
            .client
            .generate(&req, CancellationToken::new())
            .await?;

        let raw = resp
            .tool_calls
            .first()
            .map(|tc| tc.input.clone())
            .unwrap_or_else(|| serde_json::json!({ "entities": [] }));

        let candidates = parse_candidates(&raw);
        let accepted = self.filter_and_dedup(candidates);

        let (primary, secondary): (Vec<Entity>, Vec<Entity>) = accepted
            .iter()
            .cloned()
            .partition(|e| e.confidence >= PRIMARY_CONFIDENCE_CUTOFF);

        let confidence = if accepted.is_empty() {
            0.0
        } else {
            accepted.iter().map(|e| e.confidence).sum::<f64>() / accepted.len() as f64
        };

        Ok(ExtractionResult {
            entities: accepted,
            primary_entities: primary,
            secondary_entities: secondary,
            confidence,
            processing_time: started.elapsed(),
        })
    }

    /// Drop low-confidence entities unless a known-entity/synonym dictionary
    /// validates them; entities at/above the bypass confidence skip
    /// dictionary validation entirely. Deduplicates by `(type, lowercase(value))`.
    fn filter_and_dedup(&self, candidates: Vec<Entity>) -> Vec<Entity> {
        let mut seen: HashMap<(EntityType, String), Entity> = HashMap::new();

        for candidate in candidates {
            let passes = candidate.confidence >= clinical_core::config::ENTITY_DICTIONARY_BYPASS_CONFIDENCE
                || candidate.confidence >= self.confidence_threshold
                || self.in_dictionary(&candidate);

            if !passes {
                continue;
            }

            let key = (candidate.entity_type, candidate.value.to_lowercase());
            seen.entry(key)
                .and_modify(|existing| {
                    if candidate.confidence > existing.confidence {
                        *existing = candidate.clone();
                    }
                })
                .or_insert(candidate);
        }

        seen.into_values().collect()
    }

    fn in_dictionary(&self, candidate: &Entity) -> bool {
        self.known_entities
            .get(&candidate.entity_type)
            .map(|terms| {
                terms
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&candidate.value))
            })
            .unwrap_or(false)
    }
}

fn truncate_bounded(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

fn parse_candidates(raw: &serde_json::Value) -> Vec<Entity> {
    raw.get("entities")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value::<RawEntity>(v.clone()).ok())
                .filter_map(|r| {
                    Some(Entity {
                        entity_type: parse_entity_type(&r.entity_type)?,
                        value: r.value,
                        confidence: r.confidence,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Deserialize)]
struct RawEntity {
    #[serde(rename = "type")]
    entity_type: String,
    value: String,
    confidence: f64,
}

fn parse_entity_type(s: &str) -> Option<EntityType> {
    match s {
        "therapeutic_technique" => Some(EntityType::TherapeuticTechnique),
        "target_population" => Some(EntityType::TargetPopulation),
        "disorder_condition" => Some(EntityType::DisorderCondition),
        "documentation_process" => Some(EntityType::DocumentationProcess),
        "academic_validation" => Some(EntityType::AcademicValidation),
        "socratic_exploration" => Some(EntityType::SocraticExploration),
        "clinical_concept" => Some(EntityType::ClinicalConcept),
        _ => None,
    }
}

const ENTITY_SYSTEM_INSTRUCTION: &str =
    "Extract clinical entities from the user's message using the extract_entities tool.";

fn extraction_tool_declaration() -> ToolDeclaration {
    ToolDeclaration {
        name: "extract_entities".to_string(),
        description: "Record clinical entities found in the message.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string"},
                            "value": {"type": "string"},
                            "confidence": {"type": "number"}
                        },
                        "required": ["type", "value", "confidence"]
                    }
                }
            },
            "required": ["entities"]
        }),
    }
}

fn default_dictionaries() -> HashMap<EntityType, Vec<String>> {
    let mut map = HashMap::new();
    map.insert(
        EntityType::TherapeuticTechnique,
        vec![
            "cognitive restructuring".to_string(),
            "exposure therapy".to_string(),
            "mindfulness".to_string(),
        ],
    );
    map.insert(
        EntityType::DisorderCondition,
        vec![
            "generalized anxiety disorder".to_string(),
            "major depressive disorder".to_string(),
        ],
    );
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinical_model::{MockModelClient, Scripted};

    fn scripted_response(entities: serde_json::Value) -> Scripted {
        Scripted::Response(clinical_model::GenerationResponse {
            content: String::new(),
            model: "test".to_string(),
            tokens_in: 1,
            tokens_out: 1,
            stop_reason: "tool_use".to_string(),
            tool_calls: vec![clinical_model::ToolCall {
                id: "tc1".to_string(),
                name: "extract_entities".to_string(),
                input: entities,
            }],
            grounding_urls: Vec::new(),
            incomplete: false,
        })
    }

    #[tokio::test]
    async fn drops_low_confidence_unknown_entities() {
        let client = std::sync::Arc::new(MockModelClient::new(vec![scripted_response(
            serde_json::json!({
                "entities": [
                    {"type": "disorder_condition", "value": "made up disorder", "confidence": 0.4},
                    {"type": "therapeutic_technique", "value": "mindfulness", "confidence": 0.6},
                ]
            }),
        )]));
        let extractor = EntityExtractor::new(client, "test-model");
        let result = extractor.extract("some text").await.unwrap();

        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].value, "mindfulness");
    }

    #[tokio::test]
    async fn high_confidence_bypasses_dictionary() {
        let client = std::sync::Arc::new(MockModelClient::new(vec![scripted_response(
            serde_json::json!({
                "entities": [
                    {"type": "disorder_condition", "value": "novel presentation", "confidence": 0.95},
                ]
            }),
        )]));
        let extractor = EntityExtractor::new(client, "test-model");
        let result = extractor.extract("some text").await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.primary_entities.len(), 1);
    }

    #[tokio::test]
    async fn dedups_by_type_and_lowercase_value() {
        let client = std::sync::Arc::new(MockModelClient::new(vec![scripted_response(
            serde_json::json!({
                "entities": [
                    {"type": "therapeutic_technique", "value": "Mindfulness", "confidence": 0.9},
                    {"type": "therapeutic_technique", "value": "mindfulness", "confidence": 0.95},
                ]
            }),
        )]));
        let extractor = EntityExtractor::new(client, "test-model");
        let result = extractor.extract("some text").await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].confidence, 0.95);
    }
}
