use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clinical_model::AnthropicLikeClient;
use clinical_orchestrator::ConversationCore;
use clinical_patients::SqlitePatientStore;
use clinical_sessions::{SessionManager, SqliteSessionStore};

pub type Core = ConversationCore<SqliteSessionStore, SqlitePatientStore, AnthropicLikeClient>;

/// Central shared state — passed as `Arc<AppState>` to all Axum handlers.
///
/// `sessions` is held both here (for the list/create/delete/switch-agent
/// endpoints, which operate below the turn pipeline) and inside `core`
/// (for the per-session lock and the `sendMessage` protocol). Both point at
/// the same `SessionManager`, so a switch-agent call and an in-flight
/// `sendMessage` for the same session still serialize through one lock.
pub struct AppState {
    pub config: clinical_core::ClinicalConfig,
    pub sessions: Arc<SessionManager<SqliteSessionStore>>,
    pub core: Core,
    ready: AtomicBool,
}

impl AppState {
    pub fn new(config: clinical_core::ClinicalConfig) -> anyhow::Result<Self> {
        let session_conn = rusqlite::Connection::open(&config.database.path)?;
        clinical_sessions::sqlite_store::init_db(&session_conn)?;
        let sessions = Arc::new(SessionManager::new(Arc::new(SqliteSessionStore::new(
            session_conn,
        ))));

        let patient_conn = rusqlite::Connection::open(&config.database.path)?;
        clinical_patients::sqlite_store::init_db(&patient_conn)?;
        let patients = Arc::new(SqlitePatientStore::new(patient_conn));

        let api_key = std::env::var("CLINICAL_MODEL_API_KEY").unwrap_or_default();
        let base_url = std::env::var("CLINICAL_MODEL_BASE_URL").ok();
        let model = Arc::new(AnthropicLikeClient::new(api_key, base_url));

        let core = ConversationCore::new(sessions.clone(), patients, model, config.clone());

        Ok(Self {
            config,
            sessions,
            core,
            ready: AtomicBool::new(true),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::http::health::health_handler))
        .route(
            "/sessions",
            post(crate::http::sessions::create_session).get(crate::http::sessions::list_sessions),
        )
        .route(
            "/sessions/{id}",
            delete(crate::http::sessions::delete_session),
        )
        .route(
            "/sessions/{id}/switch-agent",
            post(crate::http::sessions::switch_agent),
        )
        .route(
            "/sessions/{id}/messages",
            post(crate::http::messages::send_message),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
