use std::sync::Mutex;

use async_trait::async_trait;
use clinical_core::{SessionId, UserId};
use rusqlite::Connection;
use tracing::instrument;

use crate::error::{Result, SessionError};
use crate::store::SessionStore;
use crate::types::Session;

/// Initialise the sessions table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            user_id    TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            body       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions(user_id, updated_at DESC);",
    )?;
    Ok(())
}

/// Classify a rusqlite error: constraint violations are `Conflict`,
/// I/O-class failures are `Transient`, everything else `Fatal`.
fn classify(e: rusqlite::Error) -> SessionError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            rusqlite::ErrorCode::ConstraintViolation => {
                SessionError::Conflict { id: e.to_string() }
            }
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                SessionError::Transient(e.to_string())
            }
            _ => SessionError::Database(e),
        },
        _ => SessionError::Database(e),
    }
}

/// SQLite-backed `SessionStore`. A full session body is serialized to JSON
/// per row rather than split across relational columns — history is
/// variable-shaped and always read/written whole.
pub struct SqliteSessionStore {
    db: Mutex<Connection>,
}

impl SqliteSessionStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    #[instrument(skip(self), fields(session_id = %id))]
    async fn load(&self, id: &SessionId) -> Result<Session> {
        let db = self.db.lock().unwrap();
        let body: String = db
            .query_row(
                "SELECT body FROM sessions WHERE session_id = ?1",
                rusqlite::params![id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => SessionError::NotFound {
                    id: id.as_str().to_string(),
                },
                other => classify(other),
            })?;
        Ok(serde_json::from_str(&body)?)
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn save(&self, session: &Session) -> Result<()> {
        let body = serde_json::to_string(session)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions (session_id, user_id, updated_at, body)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                user_id = excluded.user_id,
                updated_at = excluded.updated_at,
                body = excluded.body",
            rusqlite::params![
                session.session_id.as_str(),
                session.user_id.as_str(),
                session.metadata.last_updated,
                body,
            ],
        )
        .map_err(classify)?;
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %id))]
    async fn delete(&self, id: &SessionId) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows = db
            .execute(
                "DELETE FROM sessions WHERE session_id = ?1",
                rusqlite::params![id.as_str()],
            )
            .map_err(classify)?;
        if rows == 0 {
            return Err(SessionError::NotFound {
                id: id.as_str().to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user_id, limit))]
    async fn list_by_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<Session>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT body FROM sessions
                 WHERE user_id = ?1
                 ORDER BY updated_at DESC
                 LIMIT ?2",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(
                rusqlite::params![user_id.as_str(), limit as i64],
                |row| row.get::<_, String>(0),
            )
            .map_err(classify)?;
        let mut out = Vec::new();
        for row in rows {
            let body = row.map_err(classify)?;
            out.push(serde_json::from_str(&body)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionMode;

    fn make_session(user_id: &str) -> Session {
        Session::new(
            SessionId::new(),
            UserId::from(user_id),
            SessionMode::Standard,
            "socratico",
            chrono::Utc::now().to_rfc3339(),
        )
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let store = SqliteSessionStore::new(conn);

        let session = make_session("user-1");
        store.save(&session).await.unwrap();

        let loaded = store.load(&session.session_id).await.unwrap();
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.active_agent, session.active_agent);
    }

    #[tokio::test]
    async fn load_missing_returns_not_found() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let store = SqliteSessionStore::new(conn);
        let err = store.load(&SessionId::from("missing")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn save_is_idempotent_upsert() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let store = SqliteSessionStore::new(conn);

        let mut session = make_session("user-2");
        store.save(&session).await.unwrap();
        session.title = Some("renamed".to_string());
        store.save(&session).await.unwrap();

        let loaded = store.load(&session.session_id).await.unwrap();
        assert_eq!(loaded.title.as_deref(), Some("renamed"));

        let all = store
            .list_by_user(&session.user_id, 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn delete_missing_returns_not_found() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let store = SqliteSessionStore::new(conn);
        let err = store.delete(&SessionId::from("missing")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
    }
}
