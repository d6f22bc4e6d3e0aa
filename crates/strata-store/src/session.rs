//! Session management.
//!
//! A [`Session`] owns one [`rusqlite::Connection`], however it was obtained,
//! and tracks the transactional mode the engine runs it in. With auto-commit
//! off the session always holds an open transaction that [`Session::commit`]
//! and [`Session::rollback`] end and restart.

use std::cell::Cell;
use std::fmt;
use std::path::PathBuf;

use rusqlite::Connection;

use crate::config::ConnectionParams;
use crate::error::{Result, StoreError};

/// Produces fresh connections on demand, e.g. a pool or a test fixture.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> rusqlite::Result<Connection>;
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> rusqlite::Result<Connection> + Send + Sync,
{
    fn connect(&self) -> rusqlite::Result<Connection> {
        self()
    }
}

/// Everything a session can be built from.
pub enum SessionSource {
    /// An already-open connection, handed over to the session.
    Connection(Connection),
    /// A factory asked for one connection.
    Factory(Box<dyn ConnectionFactory>),
    /// Raw parameters; the session opens the database itself.
    Params(ConnectionParams),
}

impl fmt::Debug for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionSource::Connection(_) => f.write_str("Connection(..)"),
            SessionSource::Factory(_) => f.write_str("Factory(..)"),
            SessionSource::Params(params) => f.debug_tuple("Params").field(params).finish(),
        }
    }
}

/// A single store session.
pub struct Session {
    conn: Option<Connection>,
    autocommit: bool,
    savepoints: Cell<u32>,
}

impl Session {
    /// Normalize `source` into a session and apply the transactional mode.
    ///
    /// `transactional` turns auto-commit off.
    pub fn open(source: SessionSource, transactional: bool) -> Result<Self> {
        let conn = match source {
            SessionSource::Connection(conn) => conn,
            SessionSource::Factory(factory) => factory
                .connect()
                .map_err(|e| StoreError::Connection(format!("connection factory failed: {e}")))?,
            SessionSource::Params(params) => open_with_params(&params)?,
        };

        let mut session = Self {
            conn: Some(conn),
            autocommit: true,
            savepoints: Cell::new(0),
        };
        session.set_autocommit(!transactional)?;
        Ok(session)
    }

    /// Open a session from parameters, honoring their `transaction` flag.
    pub fn from_params(params: &ConnectionParams) -> Result<Self> {
        Self::open(SessionSource::Params(params.clone()), params.transaction)
    }

    /// Auto-commit session over a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::open(SessionSource::Params(ConnectionParams::in_memory()), false)
    }

    /// Borrow the underlying connection.
    ///
    /// Fails with [`StoreError::Connection`] once the session is closed.
    pub fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::Connection("session is closed".to_string()))
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .as_ref()
            .and_then(|conn| conn.path())
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }

    /// Switch auto-commit on or off.
    ///
    /// Turning it on commits the pending transaction; turning it off starts
    /// one.
    pub fn set_autocommit(&mut self, on: bool) -> Result<()> {
        let conn = self.conn()?;
        if on && !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        } else if !on && conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        self.autocommit = on;
        Ok(())
    }

    /// Commit pending work when auto-commit is off. No-op otherwise.
    pub fn commit(&self) -> Result<()> {
        if self.autocommit {
            return Ok(());
        }
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Discard pending work when auto-commit is off. No-op otherwise.
    pub fn rollback(&self) -> Result<()> {
        if self.autocommit {
            return Ok(());
        }
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Run `f` inside a transaction scope.
    ///
    /// Outside any transaction this is `BEGIN`/`COMMIT`; when one is already
    /// open (auto-commit off, or nested calls) it is a savepoint, so a
    /// failure inside `f` never poisons the enclosing transaction. The scope
    /// is rolled back if `f` fails or panics.
    pub fn transaction<T>(&self, f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
        let scope = TxScope::begin(self)?;
        match f(self) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Close the session. Closing twice is a no-op.
    ///
    /// Uncommitted work of an auto-commit-off session is rolled back.
    pub fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        if !conn.is_autocommit() {
            tracing::debug!("discarding uncommitted work on close");
            conn.execute_batch("ROLLBACK")?;
        }

        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    fn next_savepoint(&self) -> String {
        let depth = self.savepoints.get();
        self.savepoints.set(depth + 1);
        format!("strata_sp_{depth}")
    }

    fn pop_savepoint(&self) {
        self.savepoints.set(self.savepoints.get().saturating_sub(1));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close session");
        }
    }
}

/// Open (or create) a database from raw parameters.
fn open_with_params(params: &ConnectionParams) -> Result<Connection> {
    let conn = match &params.path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "opening database");
            let conn = Connection::open(path).map_err(|e| {
                StoreError::Connection(format!("failed to open {}: {e}", path.display()))
            })?;
            conn.busy_timeout(params.busy_timeout)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn
        }
        None => {
            let conn = Connection::open_in_memory().map_err(|e| {
                StoreError::Connection(format!("failed to open in-memory database: {e}"))
            })?;
            conn.busy_timeout(params.busy_timeout)?;
            conn
        }
    };

    Ok(conn)
}

/// One level of engine-managed transaction. Rolls back on drop unless
/// finished.
struct TxScope<'a> {
    session: &'a Session,
    savepoint: Option<String>,
    finished: bool,
}

impl<'a> TxScope<'a> {
    fn begin(session: &'a Session) -> Result<Self> {
        let conn = session.conn()?;
        let savepoint = if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
            None
        } else {
            let name = session.next_savepoint();
            if let Err(e) = conn.execute_batch(&format!("SAVEPOINT {name}")) {
                session.pop_savepoint();
                return Err(e.into());
            }
            Some(name)
        };

        Ok(Self {
            session,
            savepoint,
            finished: false,
        })
    }

    fn commit(mut self) -> Result<()> {
        if self.savepoint.is_none() && self.session.conn()?.is_autocommit() {
            tracing::warn!("transaction ended before its scope committed; work was not applied atomically");
        }
        let sql = match &self.savepoint {
            None => "COMMIT".to_string(),
            Some(name) => format!("RELEASE SAVEPOINT {name}"),
        };
        self.finish(&sql)
    }

    fn rollback(mut self) -> Result<()> {
        let sql = match &self.savepoint {
            None => "ROLLBACK".to_string(),
            Some(name) => format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"),
        };
        self.finish(&sql)
    }

    fn finish(&mut self, sql: &str) -> Result<()> {
        let conn = self.session.conn()?;
        // A failed statement may already have ended the transaction.
        if self.savepoint.is_none() && conn.is_autocommit() {
            self.finished = true;
            return Ok(());
        }
        conn.execute_batch(sql)?;
        self.finished = true;
        if self.savepoint.is_some() {
            self.session.pop_savepoint();
        }
        Ok(())
    }
}

impl Drop for TxScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let sql = match &self.savepoint {
            None => "ROLLBACK".to_string(),
            Some(name) => format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"),
        };
        if let Err(e) = self.finish(&sql) {
            tracing::warn!(error = %e, "failed to roll back abandoned transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(session: &Session) -> i64 {
        session
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()
    }

    fn session_with_table(transactional: bool) -> Session {
        let session = Session::open(SessionSource::Params(ConnectionParams::in_memory()), transactional)
            .expect("should open");
        session
            .conn()
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();
        session.commit().unwrap();
        session
    }

    #[test]
    fn open_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let session = Session::from_params(&ConnectionParams::file(&path)).expect("should open");
        assert!(session.path().is_some());
        assert!(path.exists());
    }

    #[test]
    fn open_from_connection_and_factory() {
        let conn = Connection::open_in_memory().unwrap();
        let session = Session::open(SessionSource::Connection(conn), false).unwrap();
        assert!(session.is_open());
        assert!(session.is_autocommit());

        let factory = || Connection::open_in_memory();
        let session = Session::open(SessionSource::Factory(Box::new(factory)), true).unwrap();
        assert!(!session.is_autocommit());
        assert!(!session.conn().unwrap().is_autocommit());
    }

    #[test]
    fn failing_factory_is_a_connection_failure() {
        let factory = || -> rusqlite::Result<Connection> { Err(rusqlite::Error::InvalidQuery) };
        let err = Session::open(SessionSource::Factory(Box::new(factory)), false)
            .err()
            .expect("should fail");
        assert!(err.is_connection_failure());
    }

    #[test]
    fn close_is_idempotent() {
        let mut session = Session::in_memory().unwrap();
        session.close().unwrap();
        session.close().unwrap();
        assert!(!session.is_open());
        assert!(session.conn().unwrap_err().is_connection_failure());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let session = session_with_table(false);

        let result: Result<()> = session.transaction(|s| {
            s.conn()?.execute("INSERT INTO t (x) VALUES (1)", [])?;
            Err(StoreError::InvalidConfig("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(count(&session), 0);

        session
            .transaction(|s| {
                s.conn()?.execute("INSERT INTO t (x) VALUES (2)", [])?;
                Ok(())
            })
            .unwrap();
        assert_eq!(count(&session), 1);
        assert!(session.conn().unwrap().is_autocommit());
    }

    #[test]
    fn transaction_ended_by_its_body_still_commits() {
        let session = session_with_table(false);

        session
            .transaction(|s| {
                let conn = s.conn()?;
                conn.execute("INSERT INTO t (x) VALUES (1)", [])?;
                conn.execute_batch("COMMIT")?;
                conn.execute("INSERT INTO t (x) VALUES (2)", [])?;
                Ok(())
            })
            .unwrap();

        assert_eq!(count(&session), 2);
        assert!(session.conn().unwrap().is_autocommit());
    }

    #[test]
    fn nested_transaction_uses_savepoint() {
        let session = session_with_table(false);

        session
            .transaction(|outer| {
                outer.conn()?.execute("INSERT INTO t (x) VALUES (1)", [])?;
                let inner: Result<()> = outer.transaction(|s| {
                    s.conn()?.execute("INSERT INTO t (x) VALUES (2)", [])?;
                    Err(StoreError::InvalidConfig("inner".to_string()))
                });
                assert!(inner.is_err());
                Ok(())
            })
            .unwrap();

        assert_eq!(count(&session), 1);
    }

    #[test]
    fn manual_mode_commit_and_rollback() {
        let session = session_with_table(true);

        session.conn().unwrap().execute("INSERT INTO t (x) VALUES (1)", []).unwrap();
        session.rollback().unwrap();
        assert_eq!(count(&session), 0);

        session.conn().unwrap().execute("INSERT INTO t (x) VALUES (2)", []).unwrap();
        session.commit().unwrap();
        session.rollback().unwrap();
        assert_eq!(count(&session), 1);
        assert!(!session.conn().unwrap().is_autocommit());
    }

    #[test]
    fn set_autocommit_commits_pending_work() {
        let mut session = session_with_table(true);
        session.conn().unwrap().execute("INSERT INTO t (x) VALUES (1)", []).unwrap();
        session.set_autocommit(true).unwrap();
        assert!(session.conn().unwrap().is_autocommit());
        assert_eq!(count(&session), 1);
    }
}
