use std::sync::Mutex;

use async_trait::async_trait;
use clinical_core::PatientId;
use rusqlite::Connection;
use tracing::instrument;

use crate::error::{PatientError, Result};
use crate::store::PatientStore;
use crate::types::Patient;

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS patients (
            patient_id TEXT PRIMARY KEY,
            body       TEXT NOT NULL
        );",
    )?;
    Ok(())
}

pub struct SqlitePatientStore {
    db: Mutex<Connection>,
}

impl SqlitePatientStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }
}

#[async_trait]
impl PatientStore for SqlitePatientStore {
    #[instrument(skip(self), fields(patient_id = %id))]
    async fn load(&self, id: &PatientId) -> Result<Patient> {
        let db = self.db.lock().unwrap();
        let body: String = db
            .query_row(
                "SELECT body FROM patients WHERE patient_id = ?1",
                rusqlite::params![id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => PatientError::NotFound {
                    id: id.as_str().to_string(),
                },
                other => PatientError::Database(other),
            })?;
        Ok(serde_json::from_str(&body)?)
    }

    #[instrument(skip(self, patient), fields(patient_id = %patient.id))]
    async fn save(&self, patient: &Patient) -> Result<()> {
        let body = serde_json::to_string(patient)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO patients (patient_id, body) VALUES (?1, ?2)
             ON CONFLICT(patient_id) DO UPDATE SET body = excluded.body",
            rusqlite::params![patient.id.as_str(), body],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let store = SqlitePatientStore::new(conn);

        let patient = Patient::new(PatientId::from("p-1"), "Jane Doe");
        store.save(&patient).await.unwrap();

        let loaded = store.load(&patient.id).await.unwrap();
        assert_eq!(loaded.display_name, "Jane Doe");
    }

    #[tokio::test]
    async fn load_missing_returns_not_found() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let store = SqlitePatientStore::new(conn);
        let err = store.load(&PatientId::from("missing")).await.unwrap_err();
        assert!(matches!(err, PatientError::NotFound { .. }));
    }
}
