use std::sync::Arc;

use clinical_core::types::Confidentiality;
use clinical_core::{SessionId, UserId};
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument, warn};

use crate::error::{Result, SessionError};
use crate::store::SessionStore;
use crate::types::{ClinicalContext, Session, SessionMode};

/// Patient-derived fields a caller may supply at session creation time.
#[derive(Debug, Clone, Default)]
pub struct PatientMeta {
    pub patient_id: Option<clinical_core::PatientId>,
    pub confidentiality: Option<Confidentiality>,
}

/// Owns the per-session mutex registry and session lifecycle.
///
/// The registry is a `DashMap<SessionId, Arc<AsyncMutex<()>>>` rather than
/// locking the session body itself: `ConversationCore` needs to hold the
/// lock across network calls while still reading/writing the session via
/// the store, so the lock is a pure gate, not a guard over the data.
pub struct SessionManager<S: SessionStore> {
    store: Arc<S>,
    locks: DashMap<SessionId, Arc<AsyncMutex<()>>>,
}

impl<S: SessionStore> SessionManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Return the per-session lock, creating one if this is the first time
    /// this session id has been touched in this process.
    pub fn lock_for(&self, id: &SessionId) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Create a new session, or return the existing one if `session_id` is
    /// supplied and already present (optionally patching patient context).
    #[instrument(skip(self, patient_meta, agent), fields(user_id = %user_id))]
    pub async fn create_session(
        &self,
        user_id: UserId,
        mode: SessionMode,
        agent: impl Into<String>,
        session_id: Option<SessionId>,
        patient_meta: Option<PatientMeta>,
    ) -> Result<Session> {
        if let Some(id) = session_id {
            match self.store.load(&id).await {
                Ok(mut existing) => {
                    if let Some(meta) = patient_meta {
                        apply_patient_meta(&mut existing.clinical_context, meta);
                        self.store.save(&existing).await?;
                    }
                    debug!(session_id = %existing.session_id, "existing session short-circuit");
                    return Ok(existing);
                }
                Err(SessionError::NotFound { .. }) => {
                    return self
                        .create_new(user_id, mode, agent, Some(id), patient_meta)
                        .await;
                }
                Err(e) => return Err(e),
            }
        }

        self.create_new(user_id, mode, agent, None, patient_meta)
            .await
    }

    async fn create_new(
        &self,
        user_id: UserId,
        mode: SessionMode,
        agent: impl Into<String>,
        session_id: Option<SessionId>,
        patient_meta: Option<PatientMeta>,
    ) -> Result<Session> {
        let agent = agent.into();
        let now = chrono::Utc::now().to_rfc3339();

        let mut id = session_id.unwrap_or_else(SessionId::new);
        // Single id-collision regeneration.
        if matches!(self.store.load(&id).await, Ok(_)) {
            warn!(session_id = %id, "generated session id collided, regenerating once");
            id = SessionId::new();
        }

        let mut session = Session::new(id, user_id, mode, agent, now);
        if let Some(meta) = patient_meta {
            apply_patient_meta(&mut session.clinical_context, meta);
        }

        self.store.save(&session).await?;
        Ok(session)
    }

    pub async fn get(&self, id: &SessionId) -> Result<Session> {
        self.store.load(id).await
    }

    /// Persist a session already loaded/mutated by the caller.
    pub async fn save(&self, session: &Session) -> Result<()> {
        self.store.save(session).await
    }

    pub async fn list_for_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<Session>> {
        self.store.list_by_user(user_id, limit).await
    }

    /// Delete a session and drop its lock entry. The agent-layer chat
    /// handle, if any, lives in `ConversationCore` rather than here; the
    /// gateway's delete endpoint closes it separately after this returns.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        self.store.delete(id).await?;
        self.locks.remove(id);
        Ok(())
    }
}

fn apply_patient_meta(ctx: &mut ClinicalContext, meta: PatientMeta) {
    if let Some(patient_id) = meta.patient_id {
        ctx.patient_id = Some(patient_id);
    }
    ctx.confidentiality = meta.confidentiality.unwrap_or(Confidentiality::High);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_store::{init_db, SqliteSessionStore};
    use rusqlite::Connection;

    fn manager() -> SessionManager<SqliteSessionStore> {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        SessionManager::new(Arc::new(SqliteSessionStore::new(conn)))
    }

    #[tokio::test]
    async fn create_session_with_existing_id_short_circuits() {
        let mgr = manager();
        let user = UserId::from("u1");
        let first = mgr
            .create_session(user.clone(), SessionMode::Standard, "socratico", None, None)
            .await
            .unwrap();

        let second = mgr
            .create_session(
                user,
                SessionMode::Standard,
                "clinico",
                Some(first.session_id.clone()),
                None,
            )
            .await
            .unwrap();

        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.active_agent, "socratico");
    }

    #[tokio::test]
    async fn create_session_defaults_confidentiality_high() {
        let mgr = manager();
        let session = mgr
            .create_session(
                UserId::from("u2"),
                SessionMode::Standard,
                "socratico",
                None,
                Some(PatientMeta {
                    patient_id: Some(clinical_core::PatientId::from("p1")),
                    confidentiality: None,
                }),
            )
            .await
            .unwrap();

        assert_eq!(
            session.clinical_context.confidentiality,
            Confidentiality::High
        );
        assert_eq!(
            session.clinical_context.patient_id,
            Some(clinical_core::PatientId::from("p1"))
        );
    }

    #[tokio::test]
    async fn delete_removes_session_and_lock() {
        let mgr = manager();
        let session = mgr
            .create_session(UserId::from("u3"), SessionMode::Standard, "socratico", None, None)
            .await
            .unwrap();

        let _lock = mgr.lock_for(&session.session_id);
        mgr.delete_session(&session.session_id).await.unwrap();

        assert!(mgr.get(&session.session_id).await.is_err());
    }
}
