//! # strata-store
//!
//! Schema-migration execution engine backed by SQLite.
//!
//! The crate applies and reverts individual migrations and records which
//! ones have been applied in a self-managed tracking table, so that many
//! processes racing over the same migration set converge on exactly one
//! application of each. Mutual exclusion comes from a sentinel row in that
//! same table. Finding, ordering and parsing migrations is left to callers.

pub mod bookkeeper;
pub mod config;
pub mod dialect;
pub mod executor;
pub mod initializer;
pub mod lock;
pub mod migration;
pub mod models;
pub mod properties;
pub mod session;
pub mod store;

mod error;

pub use bookkeeper::Bookkeeper;
pub use config::{ConnectionParams, ScriptLocation, StoreConfig};
pub use dialect::{Backend, SqlRewrite};
pub use error::{Result, StoreError};
pub use executor::Executor;
pub use initializer::Initializer;
pub use lock::{LockGuard, LockManager, RESERVED_ID};
pub use migration::{FnMigration, Migration, SqlMigration};
pub use models::*;
pub use properties::Properties;
pub use session::{ConnectionFactory, Session, SessionSource};
pub use store::MigrationStore;
