pub mod config;
pub mod errors;
pub mod models;
pub mod store;

pub use config::StorageConfig;
pub use errors::{Result, StorageError};
pub use models::{Incident, IncidentFilter, IncidentStatus, UpsertReport};
pub use store::IncidentStore;
