use async_trait::async_trait;
use clinical_core::{SessionId, UserId};

use crate::error::Result;
use crate::types::Session;

/// Storage contract for sessions. Implementations must make `save`
/// an idempotent, atomic upsert — retried writes of the same session state
/// must not duplicate history or corrupt aggregate counters.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &SessionId) -> Result<Session>;
    async fn save(&self, session: &Session) -> Result<()>;
    async fn delete(&self, id: &SessionId) -> Result<()>;
    async fn list_by_user(&self, user_id: &UserId, limit: usize) -> Result<Vec<Session>>;
}
