//! Turn orchestration entry point. Ties together session storage,
//! context compression, entity extraction, risk precheck, routing, and the
//! model call into the single `send_message` protocol the gateway calls.

use std::sync::Arc;

use clinical_core::types::AgentKind;
use clinical_core::SessionId;
use clinical_model::{ChatHandle, GenerationRequest, ModelClient, ModelMessage, ProviderError};
use clinical_patients::PatientStore;
use clinical_sessions::{Message, Role, Session, SessionManager, SessionStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::context_window::ContextWindowManager;
use crate::dynamic::{DynamicOrchestrator, DynamicState};
use crate::entities::EntityExtractor;
use crate::error::{OrchestratorError, Result};
use crate::metadata::{MetadataCollector, OperationalMetadata};
use crate::registry::AgentRegistry;
use crate::risk::EdgeCaseDetector;
use crate::router_intent::{IntentRouter, RoutingDecision, RoutingInput};

const TITLE_MAX_CHARS: usize = 50;
const TITLE_WORD_BOUNDARY_FRACTION: f64 = 0.6;

/// Caller-supplied knobs for a single turn.
pub struct SendMessageRequest {
    pub session_id: clinical_core::SessionId,
    pub user_id: clinical_core::UserId,
    pub message: String,
    pub use_streaming: bool,
    /// An explicit agent suggestion from the UI (e.g. the clinician clicked
    /// "switch to académico"). Distinct from classifier output.
    pub explicit_switch_target: Option<AgentKind>,
    pub file_references: Vec<String>,
}

pub struct SendMessageOutcome {
    pub session: Session,
    pub reply: Message,
    pub routing: RoutingDecision,
    pub metadata: OperationalMetadata,
    pub tools_offered: Vec<String>,
}

pub struct ConversationCore<S: SessionStore + 'static, P: PatientStore + 'static, C: ModelClient + 'static> {
    sessions: Arc<SessionManager<S>>,
    patients: Arc<P>,
    model: Arc<C>,
    registry: AgentRegistry,
    context_window: ContextWindowManager,
    entity_extractor: EntityExtractor<C>,
    edge_case_detector: EdgeCaseDetector,
    metadata_collector: MetadataCollector,
    intent_router: IntentRouter,
    dynamic_orchestrator: Option<DynamicOrchestrator>,
    /// Per-session tool-continuity/LRU state for the dynamic orchestrator,
    /// kept in-process rather than persisted — a process restart simply
    /// resets tool continuity,
    /// which only affects which tools get offered, never correctness.
    dynamic_states: dashmap::DashMap<clinical_core::SessionId, DynamicState>,
    /// The in-memory `ChatHandle` currently open per session. Created on a
    /// session's first turn, replaced (closing the old one) on every agent
    /// switch, and dropped when the session is deleted.
    chat_handles: dashmap::DashMap<SessionId, ChatHandle>,
    config: clinical_core::ClinicalConfig,
}

impl<S: SessionStore + 'static, P: PatientStore + 'static, C: ModelClient + 'static> ConversationCore<S, P, C> {
    pub fn new(
        sessions: Arc<SessionManager<S>>,
        patients: Arc<P>,
        model: Arc<C>,
        config: clinical_core::ClinicalConfig,
    ) -> Self {
        let registry = AgentRegistry::new(&config.agents);
        let context_window = ContextWindowManager::new(config.context_window.clone());
        let entity_extractor = EntityExtractor::new(
            model.clone(),
            config.agents.get(AgentKind::Clinico).model.clone(),
        );
        let edge_case_detector = EdgeCaseDetector::new(config.risk.safe_turns_threshold);
        let metadata_collector = MetadataCollector::new();
        let intent_router = IntentRouter::new(
            config.routing.confidence_high,
            config.routing.confidence_low,
            config.routing.max_consecutive_switches,
        );
        let dynamic_orchestrator = if config.orchestration.use_advanced_orchestration {
            Some(DynamicOrchestrator::new(IntentRouter::new(
                config.routing.confidence_high,
                config.routing.confidence_low,
                config.routing.max_consecutive_switches,
            )))
        } else {
            None
        };

        Self {
            sessions,
            patients,
            model,
            registry,
            context_window,
            entity_extractor,
            edge_case_detector,
            metadata_collector,
            intent_router,
            dynamic_orchestrator,
            dynamic_states: dashmap::DashMap::new(),
            chat_handles: dashmap::DashMap::new(),
            config,
        }
    }

    /// Closes the in-memory chat handle for a session, e.g. before its
    /// session record is deleted. A no-op if no handle is open.
    pub fn close_chat(&self, session_id: &SessionId) {
        self.chat_handles.remove(session_id);
    }

    #[instrument(skip(self, req), fields(session_id = %req.session_id))]
    pub async fn send_message(&self, req: SendMessageRequest) -> Result<SendMessageOutcome> {
        // 1. Acquire per-session lock — held for the duration of the turn so
        // two concurrent calls on the same session never interleave.
        let lock = self.sessions.lock_for(&req.session_id);
        let _guard = lock.lock().await;

        // 2. Load or create the session.
        let mut session = self
            .sessions
            .create_session(
                req.user_id.clone(),
                clinical_sessions::SessionMode::Standard,
                AgentKind::Socratico.as_str(),
                Some(req.session_id.clone()),
                None,
            )
            .await?;

        // 3. Reconcile file references (append, dedup).
        for f in &req.file_references {
            if !session.metadata.file_refs.contains(f) {
                session.metadata.file_refs.push(f.clone());
            }
        }

        let now = chrono::Utc::now().to_rfc3339();

        // 4. Compress context against the incoming message.
        let compressed = self.context_window.compress(&session.history, &req.message);

        // 5. Resolve patient summary (degrade to None on any failure).
        let patient = match &session.clinical_context.patient_id {
            Some(pid) => self.patients.load(pid).await.ok(),
            None => None,
        };

        // 6. Collect operational metadata (pure, never fails).
        let metadata = self
            .metadata_collector
            .collect(&session, patient.as_ref(), &now, None, None);

        // 7. Edge-case precheck; update risk state.
        let current_risk = session.risk_state.clone().unwrap_or_default();
        let patient_active_risk_flag = patient
            .as_ref()
            .map(|p| p.tags.iter().any(|t| t == "active_risk"))
            .unwrap_or(false);
        let edge_case = self.edge_case_detector.evaluate(
            &req.message,
            &current_risk,
            patient_active_risk_flag,
            metadata.temporal.session_duration_minutes,
            self.config.risk.night_session_minutes,
            self.config.risk.max_session_minutes,
            metadata.agent_history.consecutive_switches,
            self.config.routing.max_consecutive_switches,
            matches!(
                metadata.temporal.time_of_day,
                Some(clinical_core::types::TimeOfDay::Night)
            ),
            now.clone(),
        );
        session.risk_state = Some(edge_case.risk_state.clone());

        // 8/9. Choose the routing path: entity extraction feeds ambiguous
        // classification bands; degrade to no entities on extractor failure
        // rather than aborting the turn.
        let entities = match self.entity_extractor.extract(&req.message).await {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(error = %e, "entity extraction failed, continuing without entities");
                None
            }
        };

        let previous_agent = session
            .active_agent
            .parse::<AgentKind>()
            .unwrap_or(AgentKind::Socratico);

        // Open a chat handle the first time this session is touched in this
        // process; later turns reuse it until an agent switch replaces it.
        self.chat_handles
            .entry(req.session_id.clone())
            .or_insert_with(|| self.model.create_chat(previous_agent, Vec::new()));

        let classifier_scores = classify_heuristically(&req.message, previous_agent);

        let routing_input = RoutingInput {
            user_message: &req.message,
            previous_agent,
            edge_case: &edge_case,
            metadata: &metadata,
            entities: entities.as_ref(),
            explicit_switch_target: req.explicit_switch_target,
            classifier_scores: &classifier_scores,
        };

        let use_dynamic = self.dynamic_orchestrator.is_some() && !edge_case.force_standard_routing;
        let (routing, tools_offered) = if use_dynamic {
            let orchestrator = self.dynamic_orchestrator.as_ref().unwrap();
            let turn_index = session.history.len() / 2;
            let mut dyn_state = self
                .dynamic_states
                .entry(req.session_id.clone())
                .or_default();
            orchestrator.decide(&routing_input, &mut *dyn_state, turn_index, |agent| {
                crate::registry::profile(agent)
                    .tool_names
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            })
        } else {
            let decision = self.intent_router.route(&routing_input);
            let tools = crate::registry::profile(decision.agent)
                .tool_names
                .iter()
                .map(|s| s.to_string())
                .take(clinical_core::config::HYBRID_TOOL_CAP)
                .collect();
            (decision, tools)
        };

        // 10. Append the user message unless this was an explicit-switch
        // command (not clinical content), and derive a title on first turn.
        if !routing.suppress_user_message_persistence {
            if session.history.is_empty() {
                session.title = Some(derive_title(&req.message));
            }
            let mut user_msg = Message::user(req.message.clone(), now.clone());
            user_msg.file_references = req.file_references.clone();
            session.history.push(user_msg);
        }

        // 11. Switch agent bookkeeping: close the outgoing agent's chat
        // handle and open a new one for the incoming agent, seeded with the
        // compressed history so it has continuity across the switch.
        let agent_changed = routing.agent != previous_agent;
        session.active_agent = routing.agent.as_str().to_string();
        if agent_changed {
            let seed_history: Vec<ModelMessage> =
                compressed.messages.iter().map(to_model_message).collect();
            self.chat_handles.insert(
                req.session_id.clone(),
                self.model.create_chat(routing.agent, seed_history),
            );
        }

        // 12. Build the enriched request and call the model.
        let mut gen_req = self.registry.request_for(routing.agent);
        gen_req.messages = compressed
            .messages
            .iter()
            .map(to_model_message)
            .chain(std::iter::once(ModelMessage::user(req.message.clone())))
            .collect();

        let cancel = CancellationToken::new();
        let response = self
            .call_model_with_retry(&gen_req, req.use_streaming, cancel, &compressed)
            .await?;

        // 13. Persist the assistant turn, idempotently. Token totals only
        // grow when the reply was appended as a new turn — a merge folds
        // into a turn whose tokens were already counted.
        let merge = merge_assistant_turn(&mut session, &response, routing.agent, &now);
        session.metadata.last_updated = now.clone();
        if matches!(merge, TurnMerge::Appended(_)) {
            session.metadata.total_tokens +=
                response.tokens_in as u64 + response.tokens_out as u64;
        }
        let reply = merge.into_message();

        if let Err(e) = self.sessions.save(&session).await {
            warn!(error = %e, "failed to persist session after turn, state is dirty in memory");
            return Err(e.into());
        }

        Ok(SendMessageOutcome {
            session,
            reply,
            routing,
            metadata,
            tools_offered,
        })
    }

    /// Call the model, retrying once on a tighter compression budget if the
    /// provider reports `ContextTooLarge`, and retrying transient/rate-limit
    /// failures with jittered backoff.
    async fn call_model_with_retry(
        &self,
        req: &GenerationRequest,
        use_streaming: bool,
        cancel: CancellationToken,
        compressed: &crate::context_window::CompressedHistory,
    ) -> Result<clinical_model::GenerationResponse> {
        let mut attempt = 0u32;
        let mut current_req = req.clone();
        loop {
            let result = if use_streaming {
                self.generate_streaming(&current_req, cancel.clone()).await
            } else {
                self.model.generate(&current_req, cancel.clone()).await
            };

            match result {
                Ok(resp) => return Ok(resp),
                Err(ProviderError::ContextTooLarge(_)) if attempt == 0 => {
                    attempt += 1;
                    let tighter = compressed.estimated_tokens / 2;
                    let retried = self.context_window.compress_with_target(
                        &compressed.messages,
                        "",
                        tighter.max(1),
                    );
                    current_req.messages = retried
                        .messages
                        .iter()
                        .map(to_model_message)
                        .collect();
                }
                Err(ProviderError::ContextTooLarge(_)) => {
                    return Err(OrchestratorError::InputTooLarge);
                }
                Err(e) if e.is_retriable() && attempt < 3 => {
                    attempt += 1;
                    let backoff_ms = 200 * attempt as u64 + jitter_ms(attempt);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn generate_streaming(
        &self,
        req: &GenerationRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<clinical_model::GenerationResponse, ProviderError> {
        let (tx, mut rx) = mpsc::channel(64);
        let model = self.model.clone();
        let req = req.clone();
        let handle = tokio::spawn(async move { model.stream_generate(&req, tx, cancel).await });

        let mut content = String::new();
        let mut grounding_urls = Vec::new();
        let mut tokens_in = 0u32;
        let mut tokens_out = 0u32;
        let mut stop_reason = String::new();
        let mut model_name = String::new();
        let mut incomplete = false;

        while let Some(chunk) = rx.recv().await {
            match chunk {
                clinical_model::Chunk::TextDelta { text } => content.push_str(&text),
                clinical_model::Chunk::GroundingRef { url } => grounding_urls.push(url),
                clinical_model::Chunk::Usage {
                    tokens_in: ti,
                    tokens_out: to,
                } => {
                    tokens_in = ti;
                    tokens_out = to;
                }
                clinical_model::Chunk::End {
                    model,
                    stop_reason: sr,
                    incomplete: inc,
                } => {
                    model_name = model;
                    stop_reason = sr;
                    incomplete = inc;
                }
                clinical_model::Chunk::FunctionCall { .. } => {}
                clinical_model::Chunk::Error { message } => {
                    return Err(ProviderError::Transient(message));
                }
            }
        }

        handle.await.map_err(|e| ProviderError::Transient(e.to_string()))??;

        Ok(clinical_model::GenerationResponse {
            content,
            model: model_name,
            tokens_in,
            tokens_out,
            stop_reason,
            tool_calls: Vec::new(),
            grounding_urls,
            incomplete,
        })
    }
}

fn jitter_ms(attempt: u32) -> u64 {
    (attempt as u64 * 37) % 100
}

fn to_model_message(m: &Message) -> ModelMessage {
    match m.role {
        Role::User => ModelMessage::user(m.content.clone()),
        Role::Model => ModelMessage::model(m.content.clone()),
    }
}

/// Whether `merge_assistant_turn` appended a new history entry or folded the
/// reply into the existing last one. Token totals only grow on `Appended` —
/// a `Merged` reply already had its tokens counted on the turn that first
/// produced that content.
enum TurnMerge {
    Appended(Message),
    Merged(Message),
}

impl TurnMerge {
    fn into_message(self) -> Message {
        match self {
            TurnMerge::Appended(m) | TurnMerge::Merged(m) => m,
        }
    }
}

/// Idempotently merge the model's reply into the session history: if the
/// last message is already a model turn with whitespace-normalized-equal
/// content, merge grounding URLs instead of appending a duplicate.
fn merge_assistant_turn(
    session: &mut Session,
    response: &clinical_model::GenerationResponse,
    agent: AgentKind,
    now: &str,
) -> TurnMerge {
    let normalized_new = normalize_whitespace(&response.content);

    if let Some(last) = session.history.last_mut() {
        if last.role == Role::Model && normalize_whitespace(&last.content) == normalized_new {
            for url in &response.grounding_urls {
                if !last.grounding_urls.contains(url) {
                    last.grounding_urls.push(url.clone());
                }
            }
            last.incomplete = response.incomplete;
            return TurnMerge::Merged(last.clone());
        }
    }

    let mut msg = Message::model(response.content.clone(), agent.as_str(), now.to_string());
    msg.grounding_urls = response.grounding_urls.clone();
    msg.incomplete = response.incomplete;
    session.history.push(msg.clone());
    TurnMerge::Appended(msg)
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derives a session title from the first user message: normalize
/// whitespace, cap at `TITLE_MAX_CHARS`, prefer breaking on a word boundary
/// past 60% of the cap, otherwise hard-truncate with an ellipsis.
fn derive_title(first_message: &str) -> String {
    let normalized = normalize_whitespace(first_message);
    if normalized.chars().count() <= TITLE_MAX_CHARS {
        return normalized;
    }

    let min_len = (TITLE_MAX_CHARS as f64 * TITLE_WORD_BOUNDARY_FRACTION) as usize;
    let truncated: String = normalized.chars().take(TITLE_MAX_CHARS).collect();

    if let Some(boundary) = truncated.rfind(' ') {
        if boundary >= min_len {
            return format!("{}…", &truncated[..boundary]);
        }
    }

    format!("{}…", &truncated)
}

/// Placeholder keyword-overlap classifier used until a dedicated classifier
/// model call is wired in; keeps routing deterministic for tests and gives
/// every agent a nonzero baseline score so ties resolve via phase hints.
fn classify_heuristically(message: &str, previous_agent: AgentKind) -> Vec<(AgentKind, f64)> {
    let lowered = message.to_lowercase();
    let mut scores: Vec<(AgentKind, f64)> = AgentKind::ALL
        .iter()
        .map(|&a| (a, if a == previous_agent { 0.55 } else { 0.45 }))
        .collect();

    let bump = |scores: &mut Vec<(AgentKind, f64)>, agent: AgentKind, amount: f64| {
        if let Some(entry) = scores.iter_mut().find(|(a, _)| *a == agent) {
            entry.1 += amount;
        }
    };

    if lowered.contains("diagnóstico") || lowered.contains("síntoma") || lowered.contains("nota") {
        bump(&mut scores, AgentKind::Clinico, 0.3);
    }
    if lowered.contains("por qué") || lowered.contains("reflexion") {
        bump(&mut scores, AgentKind::Socratico, 0.3);
    }
    if lowered.contains("estudio") || lowered.contains("evidencia") {
        bump(&mut scores, AgentKind::Academico, 0.3);
    }

    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinical_model::{GenerationResponse, MockModelClient, Scripted};
    use clinical_patients::SqlitePatientStore;
    use clinical_sessions::SqliteSessionStore;
    use rusqlite::Connection;

    fn core() -> ConversationCore<SqliteSessionStore, SqlitePatientStore, MockModelClient> {
        let session_conn = Connection::open_in_memory().unwrap();
        clinical_sessions::sqlite_store::init_db(&session_conn).unwrap();
        let sessions = Arc::new(SessionManager::new(Arc::new(SqliteSessionStore::new(
            session_conn,
        ))));

        let patient_conn = Connection::open_in_memory().unwrap();
        clinical_patients::sqlite_store::init_db(&patient_conn).unwrap();
        let patients = Arc::new(SqlitePatientStore::new(patient_conn));

        let model = Arc::new(MockModelClient::new(vec![Scripted::Response(
            GenerationResponse {
                content: "Cuéntame más sobre eso.".to_string(),
                model: "test-model".to_string(),
                tokens_in: 10,
                tokens_out: 5,
                stop_reason: "end_turn".to_string(),
                tool_calls: Vec::new(),
                grounding_urls: Vec::new(),
                incomplete: false,
            },
        )]));

        ConversationCore::new(sessions, patients, model, clinical_core::ClinicalConfig::default())
    }

    #[tokio::test]
    async fn first_turn_derives_title_and_persists_reply() {
        let core = core();
        let outcome = core
            .send_message(SendMessageRequest {
                session_id: clinical_core::SessionId::new(),
                user_id: clinical_core::UserId::from("u1"),
                message: "Hola, quiero hablar sobre mi ansiedad".to_string(),
                use_streaming: false,
                explicit_switch_target: None,
                file_references: Vec::new(),
            })
            .await
            .unwrap();

        assert!(outcome.session.title.is_some());
        assert_eq!(outcome.session.history.len(), 2);
        assert_eq!(outcome.reply.content, "Cuéntame más sobre eso.");
    }

    #[tokio::test]
    async fn critical_risk_routes_to_clinico() {
        let core = core();
        let outcome = core
            .send_message(SendMessageRequest {
                session_id: clinical_core::SessionId::new(),
                user_id: clinical_core::UserId::from("u2"),
                message: "tengo ideación suicida".to_string(),
                use_streaming: false,
                explicit_switch_target: None,
                file_references: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.routing.agent, AgentKind::Clinico);
        assert!(outcome.session.risk_state.unwrap().is_risk_session);
    }

    #[tokio::test]
    async fn explicit_switch_does_not_persist_user_message() {
        let core = core();
        let outcome = core
            .send_message(SendMessageRequest {
                session_id: clinical_core::SessionId::new(),
                user_id: clinical_core::UserId::from("u3"),
                message: "cambiemos a académico".to_string(),
                use_streaming: false,
                explicit_switch_target: Some(AgentKind::Academico),
                file_references: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.routing.agent, AgentKind::Academico);
        // Only the assistant reply should have been persisted.
        assert_eq!(outcome.session.history.len(), 1);
    }

    #[tokio::test]
    async fn agent_switch_reopens_the_chat_handle_for_the_new_agent() {
        let core = core();
        let session_id = clinical_core::SessionId::new();

        core.send_message(SendMessageRequest {
            session_id: session_id.clone(),
            user_id: clinical_core::UserId::from("u4"),
            message: "hola".to_string(),
            use_streaming: false,
            explicit_switch_target: None,
            file_references: Vec::new(),
        })
        .await
        .unwrap();
        assert_eq!(
            core.chat_handles.get(&session_id).unwrap().agent,
            AgentKind::Socratico
        );

        core.send_message(SendMessageRequest {
            session_id: session_id.clone(),
            user_id: clinical_core::UserId::from("u4"),
            message: "cambiemos a académico".to_string(),
            use_streaming: false,
            explicit_switch_target: Some(AgentKind::Academico),
            file_references: Vec::new(),
        })
        .await
        .unwrap();
        assert_eq!(
            core.chat_handles.get(&session_id).unwrap().agent,
            AgentKind::Academico
        );

        core.close_chat(&session_id);
        assert!(core.chat_handles.get(&session_id).is_none());
    }

    #[test]
    fn merge_assistant_turn_is_idempotent_on_whitespace_variants() {
        let mut session = Session::new(
            clinical_core::SessionId::from("s1"),
            clinical_core::UserId::from("u1"),
            clinical_sessions::SessionMode::Standard,
            "socratico",
            "2026-08-01T10:00:00Z",
        );
        let first = GenerationResponse {
            content: "Cuéntame   más   sobre eso.".to_string(),
            model: "m".to_string(),
            tokens_in: 1,
            tokens_out: 1,
            stop_reason: "end_turn".to_string(),
            tool_calls: Vec::new(),
            grounding_urls: vec!["https://a.example".to_string()],
            incomplete: false,
        };
        let first_merge =
            merge_assistant_turn(&mut session, &first, AgentKind::Socratico, "2026-08-01T10:00:01Z");
        assert!(matches!(first_merge, TurnMerge::Appended(_)));
        assert_eq!(session.history.len(), 1);

        let replay = GenerationResponse {
            content: "Cuéntame más sobre eso.".to_string(),
            grounding_urls: vec!["https://b.example".to_string()],
            ..first
        };
        let replay_merge =
            merge_assistant_turn(&mut session, &replay, AgentKind::Socratico, "2026-08-01T10:00:02Z");

        // Whitespace-normalized-equal content merges into the existing turn
        // rather than appending a duplicate, and is reported as a merge so
        // the caller doesn't double-count its tokens.
        assert!(matches!(replay_merge, TurnMerge::Merged(_)));
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].grounding_urls.len(), 2);
    }

    #[test]
    fn derive_title_truncates_on_word_boundary() {
        let long = "a".repeat(10) + " " + &"b".repeat(60);
        let title = derive_title(&long);
        assert!(title.ends_with('…'));
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 1);
    }
}
