//! Apply-up / apply-down state machine.
//!
//! Every run holds the migration lock for the whole check, apply and record
//! sequence, so concurrent runs converge on exactly one application of each
//! migration. The lock is taken before any transaction opens; transactional
//! migrations then run the check, apply and record steps inside one
//! transaction.

use crate::bookkeeper::Bookkeeper;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::lock::{LockManager, RESERVED_ID};
use crate::migration::Migration;
use crate::models::{Direction, MigrationOutcome};
use crate::session::Session;

/// Runs single migrations against a session.
#[derive(Debug, Clone)]
pub struct Executor<'c> {
    config: &'c StoreConfig,
    books: Bookkeeper,
    lock: LockManager,
}

impl<'c> Executor<'c> {
    pub fn new(config: &'c StoreConfig) -> Result<Self> {
        let books = Bookkeeper::new(config)?;
        let lock = LockManager::new(books.table());
        Ok(Self {
            config,
            books,
            lock,
        })
    }

    /// Apply `migration` unless it is already applied or another run holds
    /// the lock.
    pub fn migrate_up(&self, session: &Session, migration: &dyn Migration) -> Result<MigrationOutcome> {
        self.run(session, migration, Direction::Up)
    }

    /// Revert `migration` unless it is not applied or another run holds the
    /// lock.
    pub fn migrate_down(&self, session: &Session, migration: &dyn Migration) -> Result<MigrationOutcome> {
        self.run(session, migration, Direction::Down)
    }

    fn run(
        &self,
        session: &Session,
        migration: &dyn Migration,
        direction: Direction,
    ) -> Result<MigrationOutcome> {
        if migration.id() == RESERVED_ID {
            return Err(StoreError::InvalidConfig(format!(
                "migration {} uses the reserved id {RESERVED_ID}",
                migration.name()
            )));
        }

        let Some(guard) = self.lock.try_lock(session)? else {
            tracing::info!(
                id = migration.id(),
                name = migration.name(),
                %direction,
                "migration lock held by another run, ignoring"
            );
            return Ok(MigrationOutcome::Ignored);
        };

        // Taken in auto-commit: the sentinel row is visible to other
        // connections for the whole run.
        let result = if migration.transactional(direction) {
            session.transaction(|s| self.apply(s, migration, direction))
        } else {
            self.apply(session, migration, direction)
        };

        match (result, guard.release()) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(outcome), Err(release_err)) => {
                if release_err.is_connection_failure() {
                    return Err(release_err);
                }
                tracing::error!(
                    id = migration.id(),
                    name = migration.name(),
                    error = %release_err,
                    "migration completed but its lock could not be released"
                );
                Ok(outcome)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                tracing::error!(error = %release_err, "failed to release migration lock after failure");
                Err(e)
            }
        }
    }

    fn apply(
        &self,
        session: &Session,
        migration: &dyn Migration,
        direction: Direction,
    ) -> Result<MigrationOutcome> {
        match direction {
            Direction::Up => self.apply_up(session, migration),
            Direction::Down => self.apply_down(session, migration),
        }
    }

    fn apply_up(&self, session: &Session, migration: &dyn Migration) -> Result<MigrationOutcome> {
        let id = migration.id();
        let name = migration.name();

        if self.books.is_complete(session, id)? {
            tracing::debug!(id, name, "migration already applied");
            return Ok(MigrationOutcome::Skipped);
        }

        tracing::info!(id, name, "Up");
        let applied = migration
            .up(session, self.config)
            .and_then(|()| self.books.mark_complete(session, id, name));

        match applied {
            Ok(()) => Ok(MigrationOutcome::Success),
            Err(e) if e.is_connection_failure() => Err(e),
            Err(e) => {
                if self.config.tx_handles_ddl {
                    tracing::error!(id, name, error = %e, "migration failed");
                } else {
                    tracing::error!(id, name, error = %e, "migration failed, backing out");
                    if let Err(down_err) = migration.down(session, self.config) {
                        tracing::debug!(id, name, error = %down_err, "compensating down action failed");
                    }
                }
                Err(execution_error(migration, Direction::Up, e))
            }
        }
    }

    fn apply_down(&self, session: &Session, migration: &dyn Migration) -> Result<MigrationOutcome> {
        let id = migration.id();
        let name = migration.name();

        if !self.books.is_complete(session, id)? {
            tracing::debug!(id, name, "migration not applied");
            return Ok(MigrationOutcome::Skipped);
        }

        tracing::info!(id, name, "Down");
        match migration.down(session, self.config) {
            Ok(()) => {}
            Err(e) if e.is_connection_failure() => return Err(e),
            Err(e) => {
                tracing::error!(id, name, error = %e, "migration revert failed");
                return Err(execution_error(migration, Direction::Down, e));
            }
        }

        self.books.mark_not_complete(session, id)?;
        Ok(MigrationOutcome::Success)
    }
}

fn execution_error(migration: &dyn Migration, direction: Direction, source: StoreError) -> StoreError {
    StoreError::Execution {
        id: migration.id(),
        name: migration.name().to_string(),
        direction,
        source: Box::new(source),
    }
}
