//! Store configuration.
//!
//! All settings have sensible defaults so a store can be opened with zero
//! configuration; [`StoreConfig::from_env`] overlays environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;

use crate::dialect::{Backend, SqlRewrite};
use crate::error::{Result, StoreError};
use crate::properties::Properties;

/// Default tracking table name.
pub const DEFAULT_TABLE_NAME: &str = "schema_migrations";

/// Default init script file name.
pub const DEFAULT_INIT_SCRIPT: &str = "init.sql";

/// Default separator between commands in one SQL text.
pub const DEFAULT_COMMAND_SEPARATOR: &str = "--;;";

/// Environment prefix for substitution properties.
const PROPERTY_ENV_PREFIX: &str = "STRATA_PROP_";

/// Parameters used to open a session when no connection is supplied.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Database file. `None` opens an in-memory database.
    /// Env: `STRATA_DB_PATH`
    pub path: Option<PathBuf>,

    /// How long SQLite waits on a locked database before reporting busy.
    /// Env: `STRATA_BUSY_TIMEOUT_MS`
    /// Default: 5000 ms
    pub busy_timeout: Duration,

    /// Open the session with auto-commit off.
    /// Env: `STRATA_TRANSACTION` (true/false)
    /// Default: `false`
    pub transaction: bool,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_millis(5_000),
            transaction: false,
        }
    }
}

impl ConnectionParams {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Platform-appropriate default database location:
    /// - Linux:   `~/.local/share/strata/strata.db`
    /// - macOS:   `~/Library/Application Support/dev.strata.strata/strata.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\strata\strata\data\strata.db`
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("dev", "strata", "strata").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("strata.db"))
    }
}

/// Where the init script lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptLocation {
    /// Plain directory on disk.
    Directory(PathBuf),
    /// Tar archive; entries are matched by the `dir/<script>` path suffix.
    Archive { archive: PathBuf, dir: String },
}

impl Default for ScriptLocation {
    fn default() -> Self {
        ScriptLocation::Directory(PathBuf::from("migrations"))
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name of the tracking table.
    /// Env: `STRATA_MIGRATION_TABLE`
    /// Default: `schema_migrations`
    pub migration_table_name: String,

    /// Migrations manage their own DDL transactions; a failed up action is
    /// not compensated by running its down action.
    /// Env: `STRATA_TX_HANDLES_DDL` (true/false)
    /// Default: `false`
    pub tx_handles_ddl: bool,

    /// Run the init script inside one transaction.
    /// Env: `STRATA_INIT_IN_TRANSACTION` (true/false)
    /// Default: `true`
    pub init_in_transaction: bool,

    /// Init script file name.
    /// Env: `STRATA_INIT_SCRIPT`
    /// Default: `init.sql`
    pub init_script: String,

    /// Migration directory or archive holding the init script.
    /// Env: `STRATA_MIGRATION_DIR`, `STRATA_MIGRATION_ARCHIVE`
    /// Default: directory `migrations`
    pub migration_location: ScriptLocation,

    /// Separator between commands in one SQL text.
    /// Env: `STRATA_COMMAND_SEPARATOR`
    /// Default: `--;;`
    pub command_separator: String,

    /// Backend the tracking table DDL targets.
    /// Env: `STRATA_BACKEND`
    /// Default: `sqlite`
    pub backend: Backend,

    /// Values substituted into the init script.
    /// Env: `STRATA_PROP_<NAME>` becomes property `<name>`.
    pub properties: Properties,

    /// Hook applied to SQL before it is executed. Code-only.
    pub modify_sql: Option<SqlRewrite>,

    /// Connection parameters used when the store opens its own session.
    pub db: ConnectionParams,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            migration_table_name: DEFAULT_TABLE_NAME.to_string(),
            tx_handles_ddl: false,
            init_in_transaction: true,
            init_script: DEFAULT_INIT_SCRIPT.to_string(),
            migration_location: ScriptLocation::default(),
            command_separator: DEFAULT_COMMAND_SEPARATOR.to_string(),
            backend: Backend::default(),
            properties: Properties::default(),
            modify_sql: None,
            db: ConnectionParams::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("STRATA_DB_PATH") {
            if !path.is_empty() {
                config.db.path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("STRATA_BUSY_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.db.busy_timeout = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %val, "Invalid STRATA_BUSY_TIMEOUT_MS, using default"),
            }
        }

        if let Ok(val) = std::env::var("STRATA_TRANSACTION") {
            config.db.transaction = parse_flag(&val);
        }

        if let Ok(table) = std::env::var("STRATA_MIGRATION_TABLE") {
            config.migration_table_name = table;
        }

        if let Ok(val) = std::env::var("STRATA_TX_HANDLES_DDL") {
            config.tx_handles_ddl = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("STRATA_INIT_IN_TRANSACTION") {
            config.init_in_transaction = parse_flag(&val);
        }

        if let Ok(name) = std::env::var("STRATA_INIT_SCRIPT") {
            config.init_script = name;
        }

        let dir = std::env::var("STRATA_MIGRATION_DIR").ok();
        config.migration_location = match std::env::var("STRATA_MIGRATION_ARCHIVE") {
            Ok(archive) => ScriptLocation::Archive {
                archive: PathBuf::from(archive),
                dir: dir.unwrap_or_else(|| "migrations".to_string()),
            },
            Err(_) => match dir {
                Some(dir) => ScriptLocation::Directory(PathBuf::from(dir)),
                None => ScriptLocation::default(),
            },
        };

        if let Ok(sep) = std::env::var("STRATA_COMMAND_SEPARATOR") {
            config.command_separator = sep;
        }

        if let Ok(val) = std::env::var("STRATA_BACKEND") {
            match val.parse::<Backend>() {
                Ok(backend) => config.backend = backend,
                Err(e) => tracing::warn!(error = %e, "Invalid STRATA_BACKEND, using default"),
            }
        }

        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(PROPERTY_ENV_PREFIX) {
                config.properties.insert(property_name(name), value);
            }
        }

        config
    }

    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.migration_table_name = name.into();
        self
    }

    pub fn with_db(mut self, db: ConnectionParams) -> Self {
        self.db = db;
        self
    }

    pub fn with_migration_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.migration_location = ScriptLocation::Directory(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_migration_archive(mut self, archive: impl AsRef<Path>, dir: impl Into<String>) -> Self {
        self.migration_location = ScriptLocation::Archive {
            archive: archive.as_ref().to_path_buf(),
            dir: dir.into(),
        };
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_modify_sql(mut self, hook: SqlRewrite) -> Self {
        self.modify_sql = Some(hook);
        self
    }

    pub fn with_tx_handles_ddl(mut self, on: bool) -> Self {
        self.tx_handles_ddl = on;
        self
    }

    pub fn with_init_in_transaction(mut self, on: bool) -> Self {
        self.init_in_transaction = on;
        self
    }
}

fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

/// `STRATA_PROP_DATA_DIR` -> `data.dir`
fn property_name(env_suffix: &str) -> String {
    env_suffix.to_ascii_lowercase().replace('_', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.migration_table_name, "schema_migrations");
        assert!(config.init_in_transaction);
        assert!(!config.tx_handles_ddl);
        assert!(config.db.path.is_none());
        assert!(!config.db.transaction);
        assert_eq!(
            config.migration_location,
            ScriptLocation::Directory(PathBuf::from("migrations"))
        );
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
    }

    #[test]
    fn test_property_name() {
        assert_eq!(property_name("DATA_DIR"), "data.dir");
        assert_eq!(property_name("SCHEMA"), "schema");
    }
}
