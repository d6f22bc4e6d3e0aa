//! Store facade owning one session and its configuration.
//!
//! [`MigrationStore`] wires the initializer, bookkeeper and executor to the
//! session it owns. When the session runs with auto-commit off, each
//! operation is committed on success and rolled back on failure.

use crate::bookkeeper::Bookkeeper;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::executor::Executor;
use crate::initializer::Initializer;
use crate::migration::Migration;
use crate::models::{InitOutcome, MigrationOutcome, SchemaStatus, TrackingRecord};
use crate::session::{Session, SessionSource};

/// A migration store bound to one session.
pub struct MigrationStore {
    config: StoreConfig,
    books: Bookkeeper,
    session: Session,
}

impl MigrationStore {
    /// Open a session from `config.db` and bind it to a store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let session = Session::from_params(&config.db)?;
        Self::with_session(config, session)
    }

    /// Bind a store to a caller-supplied connection or connection factory.
    pub fn from_source(config: StoreConfig, source: SessionSource) -> Result<Self> {
        let session = Session::open(source, config.db.transaction)?;
        Self::with_session(config, session)
    }

    /// Bind a store to an existing session.
    pub fn with_session(config: StoreConfig, session: Session) -> Result<Self> {
        let books = Bookkeeper::new(&config)?;
        Ok(Self {
            config,
            books,
            session,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run the init script, if one exists.
    pub fn init(&self) -> Result<InitOutcome> {
        self.finish(Initializer::new(&self.config).run(&self.session))
    }

    /// Create or upgrade the tracking table.
    pub fn ensure_table(&self) -> Result<SchemaStatus> {
        self.finish(self.books.init_schema(&self.session))
    }

    pub fn migrate_up(&self, migration: &dyn Migration) -> Result<MigrationOutcome> {
        let executor = Executor::new(&self.config)?;
        self.finish(executor.migrate_up(&self.session, migration))
    }

    pub fn migrate_down(&self, migration: &dyn Migration) -> Result<MigrationOutcome> {
        let executor = Executor::new(&self.config)?;
        self.finish(executor.migrate_down(&self.session, migration))
    }

    /// Ids of applied migrations, most recently applied first.
    pub fn completed_ids(&self) -> Result<Vec<i64>> {
        self.books.completed_ids(&self.session)
    }

    /// Applied migrations with their timestamps, most recent first.
    pub fn completed_records(&self) -> Result<Vec<TrackingRecord>> {
        self.books.completed_records(&self.session)
    }

    /// Close the underlying session. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Commit or roll back the session's pending work around `result`.
    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.session.commit()?;
                Ok(value)
            }
            Err(e) => {
                if !e.is_connection_failure() {
                    if let Err(rollback_err) = self.session.rollback() {
                        tracing::warn!(error = %rollback_err, "rollback after failure failed");
                    }
                }
                Err(e)
            }
        }
    }
}
