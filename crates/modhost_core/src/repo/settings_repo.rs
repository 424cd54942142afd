//! Module settings store.
//!
//! # Responsibility
//! - Persist the module id -> `{enabled}` map as one JSON blob.
//! - Read legacy encodings (bare truthy flags) without migration.
//!
//! # Invariants
//! - Absent ids read as disabled.
//! - Every write is a full read-modify-write of the blob and stores only the
//!   structured `{"enabled": bool}` form.
//! - A blob that is not a JSON object is `InvalidData`.

use crate::model::descriptor::ModuleId;
use crate::repo::{RepoError, RepoResult, SqliteModuleStore};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Option name of the settings blob in `module_options`.
pub const MODULE_SETTINGS_OPTION: &str = "module_settings";

/// Structured per-module settings record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSetting {
    pub enabled: bool,
}

/// Decoded settings blob, keyed by module id.
pub type ModuleSettings = BTreeMap<ModuleId, ModuleSetting>;

/// Source of truth for module activation.
pub trait SettingsStore {
    /// Returns the persisted flag, `false` when the id is absent.
    fn is_enabled(&self, module_id: &str) -> RepoResult<bool>;
    /// Persists one flag through a full blob rewrite.
    fn set_enabled(&self, module_id: &str, enabled: bool) -> RepoResult<()>;
    /// Returns ids whose flag reads `true`.
    fn enabled_ids(&self) -> RepoResult<BTreeSet<ModuleId>>;
}

impl SettingsStore for SqliteModuleStore<'_> {
    fn is_enabled(&self, module_id: &str) -> RepoResult<bool> {
        let settings = read_settings_in(self.conn())?;
        Ok(settings
            .get(module_id)
            .is_some_and(|setting| setting.enabled))
    }

    fn set_enabled(&self, module_id: &str, enabled: bool) -> RepoResult<()> {
        let tx = self.conn().unchecked_transaction()?;
        let mut settings = read_settings_in(&tx)?;
        settings.insert(module_id.to_string(), ModuleSetting { enabled });
        write_settings_in(&tx, &settings)?;
        tx.commit()?;
        Ok(())
    }

    fn enabled_ids(&self) -> RepoResult<BTreeSet<ModuleId>> {
        let settings = read_settings_in(self.conn())?;
        Ok(settings
            .into_iter()
            .filter(|(_, setting)| setting.enabled)
            .map(|(id, _)| id)
            .collect())
    }
}

/// Reads and decodes the settings blob; an absent row is an empty map.
pub(crate) fn read_settings_in(conn: &Connection) -> RepoResult<ModuleSettings> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM module_options WHERE name = ?1;",
            [MODULE_SETTINGS_OPTION],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => decode_settings_blob(&raw),
        None => Ok(ModuleSettings::new()),
    }
}

/// Writes the whole blob in structured form.
pub(crate) fn write_settings_in(conn: &Connection, settings: &ModuleSettings) -> RepoResult<()> {
    let encoded = serde_json::to_string(settings)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode module settings: {err}")))?;
    conn.execute(
        "INSERT INTO module_options (name, value, updated_at)
         VALUES (?1, ?2, (strftime('%s', 'now') * 1000))
         ON CONFLICT(name) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at;",
        params![MODULE_SETTINGS_OPTION, encoded],
    )?;
    Ok(())
}

/// Decodes a settings blob, accepting bare truthy flags and structured
/// records per entry.
pub fn decode_settings_blob(raw: &str) -> RepoResult<ModuleSettings> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| RepoError::InvalidData(format!("module settings are not JSON: {err}")))?;
    let Value::Object(entries) = value else {
        return Err(RepoError::InvalidData(
            "module settings must be a JSON object".to_string(),
        ));
    };

    Ok(entries
        .into_iter()
        .map(|(id, entry)| {
            let enabled = match &entry {
                Value::Object(record) => record.get("enabled").is_some_and(is_truthy),
                other => is_truthy(other),
            };
            (id, ModuleSetting { enabled })
        })
        .collect())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty() && text != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}
