//! Repository layer for module activation state and failure records.
//!
//! # Responsibility
//! - Define the settings store and error surface contracts.
//! - Isolate SQLite and JSON blob details from the lifecycle manager.
//!
//! # Invariants
//! - Auto-disable after a fault writes the settings flag and the error record
//!   in one transaction; readers never observe one without the other.
//! - Persisted data that cannot be decoded is reported as `InvalidData`, not
//!   masked.

pub mod error_repo;
pub mod settings_repo;

use crate::db::migrations::latest_version;
use crate::db::{table_exists, DbError};
use crate::model::state::ModuleErrorRecord;
use crate::selftest::SchemaProbe;
use error_repo::{upsert_error_in, ErrorStore, DEFAULT_ERROR_RETENTION};
use log::{error, info};
use rusqlite::Connection;
use settings_repo::{read_settings_in, write_settings_in, ModuleSetting, SettingsStore};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence error for settings and error-record operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted module data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "required table is missing: {table}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_)
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Combined store used by the lifecycle manager.
pub trait ModuleStore: SettingsStore + ErrorStore + SchemaProbe {
    /// Flips the module flag to false and records the failure atomically.
    fn disable_with_error(&self, record: &ModuleErrorRecord) -> RepoResult<()>;
}

/// SQLite-backed settings store and error surface.
pub struct SqliteModuleStore<'conn> {
    conn: &'conn Connection,
    retention_ms: i64,
}

impl<'conn> SqliteModuleStore<'conn> {
    /// Wraps a migrated connection with the default one-hour error retention.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self {
            conn,
            retention_ms: duration_to_ms(DEFAULT_ERROR_RETENTION),
        })
    }

    /// Overrides how long recorded failures stay visible without clearing.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_ms = duration_to_ms(retention);
        self
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    pub(crate) fn conn(&self) -> &'conn Connection {
        self.conn
    }
}

impl ModuleStore for SqliteModuleStore<'_> {
    fn disable_with_error(&self, record: &ModuleErrorRecord) -> RepoResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let mut settings = read_settings_in(&tx)?;
        settings.insert(record.module_id.clone(), ModuleSetting { enabled: false });
        write_settings_in(&tx, &settings)?;
        upsert_error_in(&tx, record)?;

        match tx.commit() {
            Ok(()) => {
                info!(
                    "event=module_auto_disable module=repo status=ok module_id={} kind={}",
                    record.module_id,
                    record.kind.as_str()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=module_auto_disable module=repo status=error module_id={} error={}",
                    record.module_id, err
                );
                Err(err.into())
            }
        }
    }
}

impl SchemaProbe for SqliteModuleStore<'_> {
    fn table_exists(&self, table: &str) -> RepoResult<bool> {
        Ok(table_exists(self.conn, table)?)
    }
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["module_options", "module_errors"] {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn duration_to_ms(value: Duration) -> i64 {
    i64::try_from(value.as_millis()).unwrap_or(i64::MAX)
}
