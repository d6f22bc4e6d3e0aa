//! The migration capability and its concrete kinds.
//!
//! The executor only sees [`Migration`]. Discovering migrations and ordering
//! them is up to the caller.

use std::fmt;

use crate::config::StoreConfig;
use crate::dialect;
use crate::error::Result;
use crate::models::Direction;
use crate::session::Session;

/// A single identified change with forward and reverse actions.
pub trait Migration: Send + Sync {
    /// Ordering key and tracking-table id.
    fn id(&self) -> i64;

    /// Human-readable name, stored as the record description.
    fn name(&self) -> &str;

    fn up(&self, session: &Session, config: &StoreConfig) -> Result<()>;

    fn down(&self, session: &Session, config: &StoreConfig) -> Result<()>;

    /// Whether the executor wraps `direction` in a transaction.
    fn transactional(&self, _direction: Direction) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// SqlMigration
// ---------------------------------------------------------------------------

/// Migration defined by SQL text.
///
/// Each text is split on the configured command separator and every piece
/// passes through the SQL rewrite hook before it runs.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    id: i64,
    name: String,
    up: String,
    down: Option<String>,
    up_tx: bool,
    down_tx: bool,
}

impl SqlMigration {
    pub fn new(id: i64, name: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            up: up.into(),
            down: None,
            up_tx: true,
            down_tx: true,
        }
    }

    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    /// Run both directions outside an engine-managed transaction.
    pub fn without_transaction(mut self) -> Self {
        self.up_tx = false;
        self.down_tx = false;
        self
    }

    /// Run one direction outside an engine-managed transaction.
    pub fn without_transaction_for(mut self, direction: Direction) -> Self {
        match direction {
            Direction::Up => self.up_tx = false,
            Direction::Down => self.down_tx = false,
        }
        self
    }

    fn run(&self, sql: &str, session: &Session, config: &StoreConfig) -> Result<()> {
        dialect::execute_script(
            session.conn()?,
            sql,
            &config.command_separator,
            config.modify_sql.as_ref(),
        )
    }
}

impl Migration for SqlMigration {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, session: &Session, config: &StoreConfig) -> Result<()> {
        self.run(&self.up, session, config)
    }

    fn down(&self, session: &Session, config: &StoreConfig) -> Result<()> {
        match &self.down {
            Some(sql) => self.run(sql, session, config),
            None => Ok(()),
        }
    }

    fn transactional(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.up_tx,
            Direction::Down => self.down_tx,
        }
    }
}

// ---------------------------------------------------------------------------
// FnMigration
// ---------------------------------------------------------------------------

type Action = Box<dyn Fn(&Session, &StoreConfig) -> Result<()> + Send + Sync>;

/// Migration defined by Rust code, for changes that need to read and
/// transform live data.
pub struct FnMigration {
    id: i64,
    name: String,
    up: Action,
    down: Action,
    tx: bool,
}

impl FnMigration {
    /// New migration whose down action does nothing until
    /// [`FnMigration::with_down`] is called.
    pub fn new<F>(id: i64, name: impl Into<String>, up: F) -> Self
    where
        F: Fn(&Session, &StoreConfig) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            id,
            name: name.into(),
            up: Box::new(up),
            down: Box::new(noop),
            tx: true,
        }
    }

    pub fn with_down<F>(mut self, down: F) -> Self
    where
        F: Fn(&Session, &StoreConfig) -> Result<()> + Send + Sync + 'static,
    {
        self.down = Box::new(down);
        self
    }

    pub fn without_transaction(mut self) -> Self {
        self.tx = false;
        self
    }
}

fn noop(_: &Session, _: &StoreConfig) -> Result<()> {
    Ok(())
}

impl fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMigration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tx", &self.tx)
            .finish_non_exhaustive()
    }
}

impl Migration for FnMigration {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, session: &Session, config: &StoreConfig) -> Result<()> {
        (self.up)(session, config)
    }

    fn down(&self, session: &Session, config: &StoreConfig) -> Result<()> {
        (self.down)(session, config)
    }

    fn transactional(&self, _direction: Direction) -> bool {
        self.tx
    }
}
