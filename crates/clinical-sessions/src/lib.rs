pub mod error;
pub mod manager;
pub mod sqlite_store;
pub mod store;
pub mod types;

pub use error::SessionError;
pub use manager::{PatientMeta, SessionManager};
pub use sqlite_store::SqliteSessionStore;
pub use store::SessionStore;
pub use types::{
    ClinicalContext, Message, Role, RiskState, Session, SessionMetadata, SessionMode,
};
