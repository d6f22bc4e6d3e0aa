//! One-time store initialization script.
//!
//! The script is looked up by name inside the migration directory, or inside
//! a tar archive whose entry path ends with `<dir>/<script>`. Properties are
//! substituted before it runs. A missing script is not an error.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use tar::{Archive, EntryType};

use crate::config::{ScriptLocation, StoreConfig};
use crate::dialect;
use crate::error::{Result, StoreError};
use crate::models::InitOutcome;
use crate::session::Session;

/// Locates and runs the init script.
#[derive(Debug, Clone, Copy)]
pub struct Initializer<'c> {
    config: &'c StoreConfig,
}

impl<'c> Initializer<'c> {
    pub fn new(config: &'c StoreConfig) -> Self {
        Self { config }
    }

    /// Read the raw init script, if one exists at the configured location.
    pub fn find_script(&self) -> Result<Option<String>> {
        let name = &self.config.init_script;
        match &self.config.migration_location {
            ScriptLocation::Directory(dir) => {
                let path = dir.join(name);
                if !path.is_file() {
                    return Ok(None);
                }
                tracing::debug!(path = %path.display(), "found init script");
                Ok(Some(std::fs::read_to_string(path)?))
            }
            ScriptLocation::Archive { archive, dir } => find_in_archive(archive, &Path::new(dir).join(name)),
        }
    }

    /// Run the init script against `session`.
    pub fn run(&self, session: &Session) -> Result<InitOutcome> {
        let name = &self.config.init_script;
        let Some(raw) = self.find_script()? else {
            tracing::error!(
                script = %name,
                location = ?self.config.migration_location,
                "init script not found"
            );
            return Ok(InitOutcome::Missing);
        };

        let script = self.config.properties.inject(&raw);
        let execute = |s: &Session| {
            dialect::execute_script(
                s.conn()?,
                &script,
                &self.config.command_separator,
                self.config.modify_sql.as_ref(),
            )
        };

        let result = if self.config.init_in_transaction {
            session.transaction(execute)
        } else {
            execute(session)
        };

        match result {
            Ok(()) => {
                tracing::info!(script = %name, "init script executed");
                Ok(InitOutcome::Executed)
            }
            Err(e) if e.is_connection_failure() => Err(e),
            Err(e) => {
                tracing::error!(script = %name, sql = %script, error = %e, "init script failed");
                Err(StoreError::InitScript {
                    script: name.clone(),
                    source: Box::new(e),
                })
            }
        }
    }
}

/// Scan `archive` for a regular entry whose path ends with `suffix`.
fn find_in_archive(archive: &Path, suffix: &Path) -> Result<Option<String>> {
    if !archive.is_file() {
        tracing::debug!(archive = %archive.display(), "migration archive does not exist");
        return Ok(None);
    }

    let mut archive = Archive::new(File::open(archive)?);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let path = entry.path()?.into_owned();
        if path.ends_with(suffix) {
            tracing::debug!(entry = %path.display(), "found init script in archive");
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            return Ok(Some(text));
        }
    }
    Ok(None)
}
