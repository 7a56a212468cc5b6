use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl StorageConfig {
    /// Derives the database file location from a base directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            db_path: base_path.join("incidents.sqlite"),
        }
    }

    /// Uses an explicit database file, e.g. one given on the command line.
    pub fn from_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}
