//! Transport-agnostic application state.
//!
//! Every request handler opens its own short-lived SQLite connection via
//! [`AppState::open_db`]; the store itself is the sole serialization point.
//! There are no in-process locks around domain state and no background jobs —
//! recurring-task staleness is resolved lazily on read (see `scheduler`).

use std::path::PathBuf;

use thiserror::Error;

use crate::config;
use crate::db;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state for the service: where the database and blob store live.
pub struct AppState {
    /// Directory containing the database and uploads.
    pub data_dir: PathBuf,
}

impl AppState {
    /// Create state rooted at the default application data directory.
    pub fn new() -> Self {
        Self {
            data_dir: config::app_data_dir(),
        }
    }

    /// Create state rooted at an explicit directory (tests use tempdirs).
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("rehatrack.db")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Ensure the data and uploads directories exist and the schema is
    /// migrated. Called once at startup.
    pub fn initialize(&self) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.uploads_dir())?;
        let _ = self.open_db()?;
        Ok(())
    }

    /// Open a connection to the service database.
    pub fn open_db(&self) -> Result<rusqlite::Connection, CoreError> {
        db::open_database(&self.db_path()).map_err(CoreError::Database)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_creates_directories_and_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let state = AppState::with_data_dir(tmp.path().join("data"));
        state.initialize().unwrap();

        assert!(state.db_path().exists());
        assert!(state.uploads_dir().is_dir());

        let conn = state.open_db().unwrap();
        let tables = crate::db::count_tables(&conn).unwrap();
        assert!(tables > 0);
    }

    #[test]
    fn open_db_is_repeatable() {
        let tmp = tempfile::tempdir().unwrap();
        let state = AppState::with_data_dir(tmp.path().to_path_buf());
        state.initialize().unwrap();

        let _a = state.open_db().unwrap();
        let _b = state.open_db().unwrap();
    }
}
