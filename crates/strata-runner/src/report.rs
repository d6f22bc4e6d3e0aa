//! JSON status report printed after a bootstrap run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_store::{InitOutcome, SchemaStatus, TrackingRecord};

/// Snapshot of the store after initialization.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database: String,
    pub table: String,
    pub init: InitOutcome,
    pub schema: SchemaStatus,
    pub applied_count: usize,
    /// Most recent migration first.
    pub applied: Vec<TrackingRecord>,
    pub generated_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        init: InitOutcome,
        schema: SchemaStatus,
        applied: Vec<TrackingRecord>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            init,
            schema,
            applied_count: applied.len(),
            applied,
            generated_at: Utc::now(),
        }
    }

    /// Latest applied migration id, if any.
    pub fn latest(&self) -> Option<i64> {
        self.applied.first().map(|r| r.id)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, description: &str) -> TrackingRecord {
        TrackingRecord {
            id,
            applied: Some(Utc::now()),
            description: Some(description.to_string()),
        }
    }

    #[test]
    fn test_report_counts_and_latest() {
        let report = StatusReport::new(
            "/tmp/app.db",
            "schema_migrations",
            InitOutcome::Executed,
            SchemaStatus::Current,
            vec![record(7, "add_index"), record(3, "create_users")],
        );
        assert_eq!(report.applied_count, 2);
        assert_eq!(report.latest(), Some(7));
    }

    #[test]
    fn test_report_json_shape() {
        let report = StatusReport::new(
            ":memory:",
            "schema_migrations",
            InitOutcome::Missing,
            SchemaStatus::Upgraded(vec!["applied"]),
            Vec::new(),
        );
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["init"], "missing");
        assert_eq!(value["schema"]["upgraded"][0], "applied");
        assert_eq!(value["applied_count"], 0);
        assert!(value["applied"].as_array().unwrap().is_empty());
        assert!(report.latest().is_none());
    }
}
