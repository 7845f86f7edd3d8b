use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};

use clinical_core::{AgentKind, SessionId};
use clinical_orchestrator::{RoutingDecision, SendMessageRequest};
use clinical_sessions::Session;

use crate::app::AppState;
use crate::http::sessions::{error_body, ErrorBody};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    #[serde(default)]
    pub file_references: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub message: String,
    #[serde(default)]
    pub use_streaming: bool,
    #[serde(default)]
    pub suggested_agent: Option<String>,
    #[serde(default)]
    pub session_meta: Option<SessionMeta>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyBody {
    pub content: String,
    pub agent: Option<String>,
    pub grounding_urls: Vec<String>,
    pub incomplete: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingInfo {
    pub agent: String,
    pub confidence: f64,
    pub reason: String,
    pub is_edge_case: bool,
    pub requires_confirmation: bool,
}

impl From<&RoutingDecision> for RoutingInfo {
    fn from(d: &RoutingDecision) -> Self {
        Self {
            agent: d.agent.as_str().to_string(),
            confidence: d.confidence,
            reason: format!("{:?}", d.reason),
            is_edge_case: d.is_edge_case,
            requires_confirmation: d.requires_confirmation,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub response: ReplyBody,
    pub routing_info: RoutingInfo,
    pub updated_state: Session,
}

/// POST /sessions/{id}/messages
///
/// Non-streaming: returns `{response, routing_info, updated_state}` in one
/// JSON body. Streaming: returns an SSE response — a `routing` frame before
/// the first `token`, then `token`/`grounding` frames, then `end` with usage
/// totals.
///
/// Both paths run the same `ConversationCore::send_message` call; the
/// streaming path synthesizes its frames from the completed outcome rather
/// than forwarding provider chunks directly, since the core only surfaces a
/// fully buffered reply across its public boundary (buffering is required
/// there anyway, for the idempotent post-stream merge).
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<Response, (StatusCode, Json<ErrorBody>)> {
    let session_id = SessionId::from(id);

    let existing = state
        .sessions
        .get(&session_id)
        .await
        .map_err(|e| error_body(e.into()))?;

    let explicit_switch_target = match body.suggested_agent {
        Some(a) => Some(a.parse::<AgentKind>().map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: e,
                    code: "INVALID_REQUEST",
                }),
            )
        })?),
        None => None,
    };

    let file_references = body
        .session_meta
        .map(|m| m.file_references)
        .unwrap_or_default();

    let use_streaming = body.use_streaming;
    let request = SendMessageRequest {
        session_id,
        user_id: existing.user_id,
        message: body.message,
        use_streaming,
        explicit_switch_target,
        file_references,
    };

    if !use_streaming {
        let outcome = state
            .core
            .send_message(request)
            .await
            .map_err(|e| error_body(e.into()))?;

        let response = SendMessageResponse {
            response: ReplyBody {
                content: outcome.reply.content.clone(),
                agent: outcome.reply.agent.clone(),
                grounding_urls: outcome.reply.grounding_urls.clone(),
                incomplete: outcome.reply.incomplete,
            },
            routing_info: RoutingInfo::from(&outcome.routing),
            updated_state: outcome.session,
        };
        return Ok(Json(response).into_response());
    }

    // A caller asking for a stream always gets one back, even on failure —
    // `synthesize_frames` emits an `error` + `end` pair in that case instead
    // of a bare JSON error body.
    let result = state.core.send_message(request).await;
    let stream = synthesize_frames(result.map_err(Into::into));
    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Turn a `send_message` result into the `routing` → `token`* → `bullet`* →
/// `grounding`* → `end` frame sequence for the streaming path, or, on
/// failure, an `error` frame followed by `end` so a streaming caller never
/// sees a bare non-SSE response. The core itself already consumed any
/// provider chunk stream internally (to perform the idempotent post-stream
/// merge before this handler ever sees the result), so framing happens over
/// the buffered reply rather than a live token feed.
fn synthesize_frames(
    result: Result<clinical_orchestrator::SendMessageOutcome, clinical_core::ClinicalError>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                let body = serde_json::json!({ "error": err.to_string(), "code": err.code() });
                yield Ok(Event::default().event("error").data(body.to_string()));
                yield Ok(Event::default().event("end").data(
                    serde_json::json!({ "tokensIn": 0, "tokensOut": 0, "totalCost": serde_json::Value::Null }).to_string()
                ));
                return;
            }
        };

        let routing_info = RoutingInfo::from(&outcome.routing);
        yield Ok(Event::default()
            .event("routing")
            .data(serde_json::to_string(&routing_info).unwrap_or_default()));

        for word in outcome.reply.content.split_inclusive(' ') {
            yield Ok(Event::default()
                .event("token")
                .data(serde_json::json!({ "text": word }).to_string()));
        }

        for bullet in &outcome.reply.reasoning_bullets {
            yield Ok(Event::default()
                .event("bullet")
                .data(serde_json::json!({ "text": bullet }).to_string()));
        }

        for url in &outcome.reply.grounding_urls {
            yield Ok(Event::default()
                .event("grounding")
                .data(serde_json::json!({ "url": url }).to_string()));
        }

        // The core doesn't thread the provider's per-call token usage back
        // through `SendMessageOutcome` (only the session's cumulative
        // counter survives the turn); `end` reports that cumulative total
        // rather than a per-turn split.
        let usage = serde_json::json!({
            "tokensIn": 0,
            "tokensOut": outcome.session.metadata.total_tokens,
            "totalCost": serde_json::Value::Null,
        });
        yield Ok(Event::default().event("end").data(usage.to_string()));
    }
}
