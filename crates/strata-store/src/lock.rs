//! Advisory lock backed by a sentinel row in the tracking table.
//!
//! Acquiring inserts a row with [`RESERVED_ID`]; the table's primary key
//! makes that insert succeed for exactly one contender. Losers get `false`
//! immediately and never wait or retry.

use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;
use crate::session::Session;

/// Id of the sentinel row. Never assigned to a real migration.
pub const RESERVED_ID: i64 = -1;

/// Acquires and releases the sentinel row of one tracking table.
#[derive(Debug, Clone)]
pub struct LockManager {
    table: String,
}

impl LockManager {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Try to insert the sentinel row.
    ///
    /// Any insert failure means the lock is held elsewhere and yields
    /// `Ok(false)`. Only a closed session is an error. The insert never waits
    /// on the connection's busy handler: a database write-locked by another
    /// run counts as held.
    pub fn acquire(&self, session: &Session) -> Result<bool> {
        let conn = session.conn()?;
        let sql = format!("INSERT INTO {} (id) VALUES (?1)", self.table);

        let inserted = without_waiting(conn, |conn| conn.execute(&sql, [RESERVED_ID]))?;
        match inserted {
            Ok(_) => {
                tracing::debug!(table = %self.table, "migration lock acquired");
                Ok(true)
            }
            Err(e) => {
                tracing::debug!(table = %self.table, error = %e, "migration lock busy");
                Ok(false)
            }
        }
    }

    /// Delete the sentinel row, whether or not this caller inserted it.
    pub fn release(&self, session: &Session) -> Result<()> {
        let conn = session.conn()?;
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        conn.execute(&sql, [RESERVED_ID])?;
        tracing::debug!(table = %self.table, "migration lock released");
        Ok(())
    }

    /// Acquire the lock and return a guard that releases it when dropped.
    pub fn try_lock<'s>(&self, session: &'s Session) -> Result<Option<LockGuard<'s>>> {
        if !self.acquire(session)? {
            return Ok(None);
        }
        Ok(Some(LockGuard {
            session,
            manager: self.clone(),
            released: false,
        }))
    }
}

/// Run `f` with the busy timeout disabled, then restore the previous one.
fn without_waiting<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> Result<rusqlite::Result<T>> {
    let previous: i64 = conn.pragma_query_value(None, "busy_timeout", |row| row.get(0))?;
    conn.busy_timeout(Duration::ZERO)?;
    let result = f(conn);
    conn.busy_timeout(Duration::from_millis(previous.max(0) as u64))?;
    Ok(result)
}

/// Held migration lock.
///
/// Call [`LockGuard::release`] to observe release errors; otherwise the
/// sentinel row is deleted on drop, including during unwinding.
pub struct LockGuard<'s> {
    session: &'s Session,
    manager: LockManager,
    released: bool,
}

impl LockGuard<'_> {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.manager.release(self.session)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.manager.release(self.session) {
            tracing::error!(table = %self.manager.table, error = %e, "failed to release migration lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::config::ConnectionParams;

    fn session() -> Session {
        let session = Session::in_memory().unwrap();
        session
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TABLE schema_migrations (id BIGINT NOT NULL PRIMARY KEY, applied TIMESTAMP, description VARCHAR(1024))",
            )
            .unwrap();
        session
    }

    fn sentinel_rows(session: &Session) -> i64 {
        session
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM schema_migrations WHERE id = ?1",
                [RESERVED_ID],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_acquire_is_not_reentrant() {
        let session = session();
        let lock = LockManager::new("schema_migrations");

        assert!(lock.acquire(&session).unwrap());
        assert!(!lock.acquire(&session).unwrap());
        assert_eq!(sentinel_rows(&session), 1);

        lock.release(&session).unwrap();
        assert_eq!(sentinel_rows(&session), 0);
        assert!(lock.acquire(&session).unwrap());
    }

    #[test]
    fn test_release_without_holding() {
        let session = session();
        let lock = LockManager::new("schema_migrations");
        lock.release(&session).unwrap();
        lock.release(&session).unwrap();
    }

    #[test]
    fn test_missing_table_reads_as_busy() {
        let session = Session::in_memory().unwrap();
        let lock = LockManager::new("schema_migrations");
        assert!(!lock.acquire(&session).unwrap());
    }

    #[test]
    fn test_closed_session_is_an_error() {
        let mut session = session();
        session.close().unwrap();
        let lock = LockManager::new("schema_migrations");
        assert!(lock.acquire(&session).unwrap_err().is_connection_failure());
    }

    #[test]
    fn test_acquire_restores_busy_timeout() {
        let session = session();
        let conn = session.conn().unwrap();
        conn.busy_timeout(Duration::from_millis(1_234)).unwrap();

        assert!(LockManager::new("schema_migrations").acquire(&session).unwrap());
        let timeout: i64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 1_234);
    }

    #[test]
    fn test_write_locked_database_reads_as_busy_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let params = ConnectionParams::file(dir.path().join("lock.db"));
        let holder = Session::from_params(&params).unwrap();
        holder
            .conn()
            .unwrap()
            .execute_batch("CREATE TABLE schema_migrations (id BIGINT NOT NULL PRIMARY KEY)")
            .unwrap();
        let contender = Session::from_params(&params).unwrap();

        let conn = holder.conn().unwrap();
        conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        conn.execute("INSERT INTO schema_migrations (id) VALUES (7)", []).unwrap();

        let started = Instant::now();
        assert!(!LockManager::new("schema_migrations").acquire(&contender).unwrap());
        assert!(started.elapsed() < Duration::from_secs(1));

        conn.execute_batch("ROLLBACK").unwrap();
        assert!(LockManager::new("schema_migrations").acquire(&contender).unwrap());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let session = session();
        let lock = LockManager::new("schema_migrations");

        {
            let guard = lock.try_lock(&session).unwrap();
            assert!(guard.is_some());
            assert!(lock.try_lock(&session).unwrap().is_none());
        }
        assert_eq!(sentinel_rows(&session), 0);

        let guard = lock.try_lock(&session).unwrap().unwrap();
        guard.release().unwrap();
        assert_eq!(sentinel_rows(&session), 0);
    }
}
