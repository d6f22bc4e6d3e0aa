//! Backend capabilities and the SQL rewrite hook.
//!
//! The engine only generates the DDL for its own tracking table. Everything
//! it executes on behalf of callers (init scripts, SQL migrations) is split
//! on the configured command separator and passed through the optional
//! rewrite hook first.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend family the generated DDL targets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Sqlite,
    Postgres,
    Mysql,
    SqlServer,
    H2,
}

impl Backend {
    /// Column type used for the tracking table's `applied` column.
    pub fn applied_column_type(self) -> &'static str {
        match self {
            Backend::SqlServer => "DATETIME",
            Backend::Sqlite | Backend::Postgres | Backend::Mysql | Backend::H2 => "TIMESTAMP",
        }
    }
}

impl FromStr for Backend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "mysql" | "mariadb" => Ok(Backend::Mysql),
            "sqlserver" | "mssql" => Ok(Backend::SqlServer),
            "h2" => Ok(Backend::H2),
            other => Err(StoreError::InvalidConfig(format!("unknown backend: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// SqlRewrite
// ---------------------------------------------------------------------------

/// Pluggable transform from one SQL text to the statements actually run.
///
/// Returning an empty list drops the statement.
#[derive(Clone)]
pub struct SqlRewrite(Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>);

impl SqlRewrite {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, sql: &str) -> Vec<String> {
        (self.0)(sql)
    }
}

impl fmt::Debug for SqlRewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SqlRewrite(..)")
    }
}

/// Run `sql` through the hook, or pass it through unchanged.
pub fn rewrite(hook: Option<&SqlRewrite>, sql: &str) -> Vec<String> {
    match hook {
        Some(hook) => hook.apply(sql),
        None => vec![sql.to_string()],
    }
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// Split a script on `separator`, dropping blank pieces.
///
/// A script without the separator comes back as a single piece, which is
/// later executed as one batch.
pub fn split_commands(script: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() || !script.contains(separator) {
        let trimmed = script.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    script
        .split(separator)
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

/// Execute every command of `script` against `conn`.
pub fn execute_script(
    conn: &Connection,
    script: &str,
    separator: &str,
    hook: Option<&SqlRewrite>,
) -> Result<()> {
    for command in split_commands(script, separator) {
        for statement in rewrite(hook, &command) {
            tracing::trace!(sql = %statement, "executing");
            conn.execute_batch(&statement)?;
        }
    }
    Ok(())
}

/// Validate a table name before it is interpolated into SQL.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');

    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(StoreError::InvalidConfig(format!("invalid table name: {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applied_column_type() {
        assert_eq!(Backend::SqlServer.applied_column_type(), "DATETIME");
        assert_eq!(Backend::Postgres.applied_column_type(), "TIMESTAMP");
        assert_eq!(Backend::Sqlite.applied_column_type(), "TIMESTAMP");
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("MSSQL".parse::<Backend>().unwrap(), Backend::SqlServer);
        assert_eq!(" postgresql ".parse::<Backend>().unwrap(), Backend::Postgres);
        assert!("oracle".parse::<Backend>().is_err());
    }

    #[test]
    fn test_split_commands() {
        let script = "CREATE TABLE a (x INT);\n--;;\n\n--;;\nCREATE TABLE b (y INT);";
        assert_eq!(
            split_commands(script, "--;;"),
            vec!["CREATE TABLE a (x INT);", "CREATE TABLE b (y INT);"]
        );
        assert_eq!(split_commands("SELECT 1;", "--;;"), vec!["SELECT 1;"]);
        assert!(split_commands("  \n", "--;;").is_empty());
    }

    #[test]
    fn test_execute_script_applies_hook() {
        let conn = Connection::open_in_memory().unwrap();
        let hook = SqlRewrite::new(|sql| vec![sql.replace("BIGSERIAL", "INTEGER")]);

        execute_script(
            &conn,
            "CREATE TABLE t (id BIGSERIAL PRIMARY KEY);--;;INSERT INTO t (id) VALUES (7);",
            "--;;",
            Some(&hook),
        )
        .unwrap();

        let id: i64 = conn.query_row("SELECT id FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(id, 7);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("schema_migrations").is_ok());
        assert!(validate_identifier("app.schema_migrations").is_ok());
        assert!(validate_identifier("1table").is_err());
        assert!(validate_identifier("t; DROP TABLE x").is_err());
        assert!(validate_identifier("").is_err());
    }
}
