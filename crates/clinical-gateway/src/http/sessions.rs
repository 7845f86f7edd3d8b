use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use clinical_core::{AgentKind, Confidentiality, PatientId, SessionId, UserId};
use clinical_sessions::{PatientMeta, Session, SessionMode};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSessionMeta {
    pub patient_id: Option<String>,
    pub confidentiality: Option<Confidentiality>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id: String,
    #[serde(default)]
    pub mode: SessionMode,
    pub agent: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub patient_session_meta: Option<PatientSessionMeta>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub chat_state: Session,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

pub(crate) fn error_body(err: clinical_core::ClinicalError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &err {
        clinical_core::ClinicalError::NotFound(_) => StatusCode::NOT_FOUND,
        clinical_core::ClinicalError::Conflict(_) => StatusCode::CONFLICT,
        clinical_core::ClinicalError::InputTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        clinical_core::ClinicalError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        clinical_core::ClinicalError::PolicyBlocked(_) => StatusCode::FORBIDDEN,
        clinical_core::ClinicalError::Cancelled => StatusCode::BAD_REQUEST,
        clinical_core::ClinicalError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        clinical_core::ClinicalError::Config(_) | clinical_core::ClinicalError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            code: err.code(),
        }),
    )
}

/// POST /sessions — create, or return an existing session unchanged if
/// `session_id` is supplied and already present.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, (StatusCode, Json<ErrorBody>)> {
    let patient_meta = req.patient_session_meta.map(|m| PatientMeta {
        patient_id: m.patient_id.map(PatientId::from),
        confidentiality: m.confidentiality,
    });

    let session = state
        .sessions
        .create_session(
            UserId::from(req.user_id),
            req.mode,
            req.agent,
            req.session_id.map(SessionId::from),
            patient_meta,
        )
        .await
        .map_err(|e| error_body(e.into()))?;

    Ok(Json(SessionResponse {
        session_id: session.session_id.as_str().to_string(),
        chat_state: session,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    pub user_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Opaque cursor — currently a decimal offset into the user's
    /// most-recent-first session list, since `SessionStore::list_by_user`
    /// does not support keyset pagination.
    #[serde(default)]
    pub page_token: Option<String>,
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
    pub next_page_token: Option<String>,
}

/// GET /sessions?userId=...&pageSize=...&pageToken=...
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListSessionsQuery>,
) -> Result<Json<ListSessionsResponse>, (StatusCode, Json<ErrorBody>)> {
    let offset: usize = q
        .page_token
        .as_deref()
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);

    let fetched = state
        .sessions
        .list_for_user(&UserId::from(q.user_id), offset + q.page_size + 1)
        .await
        .map_err(|e| error_body(e.into()))?;

    let has_more = fetched.len() > offset + q.page_size;
    let page: Vec<Session> = fetched.into_iter().skip(offset).take(q.page_size).collect();
    let next_page_token = has_more.then(|| (offset + q.page_size).to_string());

    Ok(Json(ListSessionsResponse {
        sessions: page,
        next_page_token,
    }))
}

/// DELETE /sessions/{id}
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let session_id = SessionId::from(id);
    state
        .sessions
        .delete_session(&session_id)
        .await
        .map_err(|e| error_body(e.into()))?;
    state.core.close_chat(&session_id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SwitchAgentRequest {
    pub agent: String,
}

/// POST /sessions/{id}/switch-agent — runs the same turn pipeline as a
/// message send, but with an explicit switch target and a placeholder
/// utterance that `IntentRouter`'s explicit-switch precedence level
/// suppresses from persistence.
pub async fn switch_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SwitchAgentRequest>,
) -> Result<Json<SessionResponse>, (StatusCode, Json<ErrorBody>)> {
    let session_id = SessionId::from(id);
    let target: AgentKind = req.agent.parse().map_err(|e: String| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: e,
                code: "INVALID_REQUEST",
            }),
        )
    })?;

    let existing = state
        .sessions
        .get(&session_id)
        .await
        .map_err(|e| error_body(e.into()))?;

    let outcome = state
        .core
        .send_message(clinical_orchestrator::SendMessageRequest {
            session_id,
            user_id: existing.user_id,
            message: "solicitud de cambio de agente".to_string(),
            use_streaming: false,
            explicit_switch_target: Some(target),
            file_references: Vec::new(),
        })
        .await
        .map_err(|e| error_body(e.into()))?;

    Ok(Json(SessionResponse {
        session_id: outcome.session.session_id.as_str().to_string(),
        chat_state: outcome.session,
    }))
}
