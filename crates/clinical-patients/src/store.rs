use async_trait::async_trait;
use clinical_core::PatientId;

use crate::error::Result;
use crate::types::Patient;

/// Read-mostly contract for patient records. The orchestration core only
/// ever reads through this trait; mutation is an external collaborator's
/// responsibility.
#[async_trait]
pub trait PatientStore: Send + Sync {
    async fn load(&self, id: &PatientId) -> Result<Patient>;
    async fn save(&self, patient: &Patient) -> Result<()>;
}
