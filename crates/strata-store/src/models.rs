//! Value types shared by the executor, the bookkeeper and callers.
//!
//! Every struct derives `Serialize` so it can be handed directly to status
//! reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which action of a migration is being run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of a single apply-up or apply-down call that did not fail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The action ran and the tracking table was updated.
    Success,
    /// The migration was already in the requested state; nothing ran.
    Skipped,
    /// Another run holds the lock; nothing ran.
    Ignored,
}

impl MigrationOutcome {
    /// `true` when no action was executed.
    pub fn is_noop(self) -> bool {
        !matches!(self, MigrationOutcome::Success)
    }
}

// ---------------------------------------------------------------------------
// TrackingRecord
// ---------------------------------------------------------------------------

/// One row of the tracking table describing an applied migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingRecord {
    /// Migration identifier.
    pub id: i64,
    /// When the migration was applied. Rows written by older layouts may
    /// have no timestamp.
    pub applied: Option<DateTime<Utc>>,
    /// Free-text description, normally the migration name.
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// SchemaStatus
// ---------------------------------------------------------------------------

/// What [`crate::Bookkeeper::init_schema`] had to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStatus {
    /// The tracking table did not exist and was created.
    Created,
    /// The table existed with a legacy layout; the listed columns were added.
    Upgraded(Vec<&'static str>),
    /// The table already had the expected shape.
    Current,
}

// ---------------------------------------------------------------------------
// InitOutcome
// ---------------------------------------------------------------------------

/// What [`crate::Initializer::run`] did.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InitOutcome {
    /// The script was found and executed.
    Executed,
    /// No init script exists at the configured location.
    Missing,
}
