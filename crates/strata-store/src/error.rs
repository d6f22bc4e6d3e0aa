use thiserror::Error;

use crate::models::Direction;

/// Errors produced by the store layer.
///
/// Lock contention and "already in the desired state" are not errors; they
/// surface as [`crate::MigrationOutcome`] values instead.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from a bookkeeping or session statement.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The session is closed or could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A migration's up or down action failed.
    #[error("Migration {id} ({name}) failed going {direction}: {source}")]
    Execution {
        id: i64,
        name: String,
        direction: Direction,
        #[source]
        source: Box<StoreError>,
    },

    /// The init script was found but could not be executed.
    #[error("Init script {script} failed: {source}")]
    InitScript {
        script: String,
        #[source]
        source: Box<StoreError>,
    },

    /// Generic I/O error (reading scripts or archives).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration rejected before touching the store.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,
}

impl StoreError {
    /// `true` for failures of the session itself rather than of a statement.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
