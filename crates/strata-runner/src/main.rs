//! # strata-runner
//!
//! Bootstraps a strata migration store from environment variables.
//!
//! This binary:
//! - opens the configured SQLite database (platform data dir by default)
//! - runs the init script from the migration directory or archive
//! - creates or upgrades the tracking table
//! - prints a JSON status report of applied migrations to stdout

mod report;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use strata_store::{ConnectionParams, InitOutcome, MigrationStore, StoreConfig};

use crate::report::StatusReport;

fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,strata_runner=debug,strata_store=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting strata runner v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let mut config = StoreConfig::from_env();
    if config.db.path.is_none() {
        config.db.path = Some(ConnectionParams::default_path()?);
    }
    info!(?config, "Loaded configuration");

    let database = config
        .db
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ":memory:".to_string());

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let mut store = MigrationStore::open(config)
        .with_context(|| format!("failed to open database at {database}"))?;

    // -----------------------------------------------------------------------
    // 4. Init script and tracking table
    // -----------------------------------------------------------------------
    let init = store.init().context("init script failed")?;
    if init == InitOutcome::Missing {
        info!("Continuing without init script");
    }

    let schema = store
        .ensure_table()
        .context("failed to prepare tracking table")?;
    info!(
        table = %store.config().migration_table_name,
        ?schema,
        "Tracking table ready"
    );

    // -----------------------------------------------------------------------
    // 5. Report
    // -----------------------------------------------------------------------
    let records = store.completed_records()?;
    let report = StatusReport::new(
        database,
        store.config().migration_table_name.clone(),
        init,
        schema,
        records,
    );
    info!(
        applied = report.applied_count,
        latest = ?report.latest(),
        "Store status"
    );
    println!("{}", report.to_json()?);

    store.close()?;
    Ok(())
}
