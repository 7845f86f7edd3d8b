pub mod error;
pub mod sqlite_store;
pub mod store;
pub mod types;

pub use error::PatientError;
pub use sqlite_store::SqlitePatientStore;
pub use store::PatientStore;
pub use types::{Patient, SummaryCache};
