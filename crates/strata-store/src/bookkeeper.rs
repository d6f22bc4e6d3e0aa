//! Tracking table management.
//!
//! The tracking table records one row per applied migration plus, while a
//! run is in progress, the lock's sentinel row. [`Bookkeeper::init_schema`]
//! creates it on first use and upgrades layouts that predate the `applied`
//! and `description` columns.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::params;
use rusqlite::types::ValueRef;

use crate::config::StoreConfig;
use crate::dialect::{self, Backend, SqlRewrite};
use crate::error::Result;
use crate::lock::RESERVED_ID;
use crate::models::{SchemaStatus, TrackingRecord};
use crate::session::Session;

/// Maximum length of the `description` column.
const DESCRIPTION_LENGTH: usize = 1024;

/// Reads and writes the tracking table.
#[derive(Debug, Clone)]
pub struct Bookkeeper {
    table: String,
    backend: Backend,
    modify_sql: Option<SqlRewrite>,
}

impl Bookkeeper {
    /// Build a bookkeeper for the configured table, validating its name.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        dialect::validate_identifier(&config.migration_table_name)?;
        Ok(Self {
            table: config.migration_table_name.clone(),
            backend: config.backend,
            modify_sql: config.modify_sql.clone(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    // ------------------------------------------------------------------
    // Schema
    // ------------------------------------------------------------------

    /// Make sure the tracking table exists with the expected columns.
    pub fn init_schema(&self, session: &Session) -> Result<SchemaStatus> {
        // Surface a dead session instead of mistaking it for a missing table.
        session.conn()?;

        if !self.table_exists(session) {
            return match self.create_table(session) {
                Ok(()) => {
                    tracing::info!(table = %self.table, "created migration table");
                    Ok(SchemaStatus::Created)
                }
                // Another process may have created it between probe and create.
                Err(e) if self.table_exists(session) => {
                    tracing::debug!(table = %self.table, error = %e, "migration table created concurrently");
                    Ok(SchemaStatus::Current)
                }
                Err(e) => Err(e),
            };
        }

        if self.probe(session, &format!("SELECT applied, description FROM {}", self.table)) {
            return Ok(SchemaStatus::Current);
        }

        let mut added = Vec::new();
        for (column, column_type) in [
            ("applied", self.backend.applied_column_type().to_string()),
            ("description", format!("VARCHAR({DESCRIPTION_LENGTH})")),
        ] {
            if self.probe(session, &format!("SELECT {column} FROM {}", self.table)) {
                continue;
            }
            self.execute_ddl(
                session,
                &format!("ALTER TABLE {} ADD COLUMN {column} {column_type}", self.table),
            )?;
            added.push(column);
        }

        tracing::info!(table = %self.table, columns = ?added, "upgraded migration table");
        Ok(SchemaStatus::Upgraded(added))
    }

    fn table_exists(&self, session: &Session) -> bool {
        self.probe(session, &format!("SELECT 1 FROM {}", self.table))
    }

    /// Run `sql` in its own transaction scope and report whether it worked.
    ///
    /// The scope is discarded either way; on some backends a failed select
    /// leaves the enclosing transaction unusable.
    fn probe(&self, session: &Session, sql: &str) -> bool {
        let result = session.transaction(|s| {
            let mut stmt = s.conn()?.prepare(sql)?;
            let mut rows = stmt.query([])?;
            rows.next()?;
            Ok(())
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!(sql = %sql, error = %e, "schema probe failed");
                false
            }
        }
    }

    fn create_table(&self, session: &Session) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE {} (id BIGINT NOT NULL PRIMARY KEY, applied {}, description VARCHAR({DESCRIPTION_LENGTH}))",
            self.table,
            self.backend.applied_column_type(),
        );
        self.execute_ddl(session, &ddl)
    }

    fn execute_ddl(&self, session: &Session, ddl: &str) -> Result<()> {
        let conn = session.conn()?;
        for statement in dialect::rewrite(self.modify_sql.as_ref(), ddl) {
            tracing::debug!(sql = %statement, "executing migration table DDL");
            conn.execute_batch(&statement)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Whether a tracking record exists for `id`.
    pub fn is_complete(&self, session: &Session, id: i64) -> Result<bool> {
        let conn = session.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT 1 FROM {} WHERE id = ?1", self.table))?;
        Ok(stmt.exists(params![id])?)
    }

    /// Record `id` as applied now.
    pub fn mark_complete(&self, session: &Session, id: i64, description: &str) -> Result<()> {
        self.mark_complete_at(session, id, description, Utc::now())
    }

    /// Record `id` as applied at `applied`.
    pub fn mark_complete_at(
        &self,
        session: &Session,
        id: i64,
        description: &str,
        applied: DateTime<Utc>,
    ) -> Result<()> {
        let description: String = description.chars().take(DESCRIPTION_LENGTH).collect();
        session.conn()?.execute(
            &format!(
                "INSERT INTO {} (id, applied, description) VALUES (?1, ?2, ?3)",
                self.table
            ),
            params![
                id,
                applied.to_rfc3339_opts(SecondsFormat::Micros, true),
                description
            ],
        )?;
        Ok(())
    }

    /// Remove the tracking record for `id`.
    pub fn mark_not_complete(&self, session: &Session, id: i64) -> Result<bool> {
        let affected = session.conn()?.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table),
            params![id],
        )?;
        Ok(affected > 0)
    }

    /// All tracking records except the sentinel, newest first.
    ///
    /// Records without a readable timestamp sort last.
    pub fn completed_records(&self, session: &Session) -> Result<Vec<TrackingRecord>> {
        let conn = session.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, applied, description FROM {} WHERE id != ?1",
            self.table
        ))?;

        let rows = stmt.query_map(params![RESERVED_ID], |row| {
            Ok(TrackingRecord {
                id: row.get(0)?,
                applied: parse_applied(row.get_ref(1)?),
                description: row.get(2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        records.sort_by(|a, b| b.applied.cmp(&a.applied).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    /// Ids of applied migrations, most recently applied first.
    pub fn completed_ids(&self, session: &Session) -> Result<Vec<i64>> {
        Ok(self
            .completed_records(session)?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }
}

/// Decode an `applied` value written by this engine or an older layout.
fn parse_applied(value: ValueRef<'_>) -> Option<DateTime<Utc>> {
    match value {
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).ok()?.trim();
            DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").map(|dt| dt.and_utc())
                })
                .map_err(|e| tracing::debug!(value = %text, error = %e, "unreadable applied timestamp"))
                .ok()
        }
        ValueRef::Integer(secs) => DateTime::from_timestamp(secs, 0),
        ValueRef::Null | ValueRef::Real(_) | ValueRef::Blob(_) => None,
    }
}
