//! Module error surface.
//!
//! # Responsibility
//! - Persist at most one failure record per module.
//! - Expose listing, lookup and clearing with time-based retention.
//!
//! # Invariants
//! - Records older than the retention window are invisible to reads and are
//!   removed by `purge_expired`.
//! - Recording a new failure replaces the previous record of that module.

use crate::model::state::{FaultKind, ModuleErrorRecord};
use crate::repo::{RepoError, RepoResult, SqliteModuleStore};
use rusqlite::{params, Connection, Row};
use std::time::Duration;
use uuid::Uuid;

/// Recorded failures stay visible for one hour unless cleared.
pub const DEFAULT_ERROR_RETENTION: Duration = Duration::from_secs(60 * 60);

const ERROR_SELECT_SQL: &str = "SELECT
    module_id,
    module_name,
    kind,
    message,
    recorded_at,
    session_id
FROM module_errors";

/// Error surface contract.
pub trait ErrorStore {
    /// Records or replaces the failure of one module.
    fn record_error(&self, record: &ModuleErrorRecord) -> RepoResult<()>;
    /// Lists unexpired records, oldest first.
    fn list_errors(&self, now_ms: i64) -> RepoResult<Vec<ModuleErrorRecord>>;
    /// Returns the unexpired record of one module.
    fn get_error(&self, module_id: &str, now_ms: i64) -> RepoResult<Option<ModuleErrorRecord>>;
    /// Removes one record. Returns `false` when none existed.
    fn clear_error(&self, module_id: &str) -> RepoResult<bool>;
    /// Deletes expired records and returns how many were removed.
    fn purge_expired(&self, now_ms: i64) -> RepoResult<usize>;
}

impl ErrorStore for SqliteModuleStore<'_> {
    fn record_error(&self, record: &ModuleErrorRecord) -> RepoResult<()> {
        upsert_error_in(self.conn(), record)
    }

    fn list_errors(&self, now_ms: i64) -> RepoResult<Vec<ModuleErrorRecord>> {
        let cutoff = now_ms.saturating_sub(self.retention_ms());
        let mut stmt = self.conn().prepare(&format!(
            "{ERROR_SELECT_SQL}
             WHERE recorded_at > ?1
             ORDER BY recorded_at ASC, module_id ASC;"
        ))?;
        let mut rows = stmt.query([cutoff])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_error_row(row)?);
        }
        Ok(records)
    }

    fn get_error(&self, module_id: &str, now_ms: i64) -> RepoResult<Option<ModuleErrorRecord>> {
        let cutoff = now_ms.saturating_sub(self.retention_ms());
        let mut stmt = self.conn().prepare(&format!(
            "{ERROR_SELECT_SQL}
             WHERE module_id = ?1 AND recorded_at > ?2;"
        ))?;
        let mut rows = stmt.query(params![module_id, cutoff])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_error_row(row)?));
        }
        Ok(None)
    }

    fn clear_error(&self, module_id: &str) -> RepoResult<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM module_errors WHERE module_id = ?1;", [module_id])?;
        Ok(changed > 0)
    }

    fn purge_expired(&self, now_ms: i64) -> RepoResult<usize> {
        let cutoff = now_ms.saturating_sub(self.retention_ms());
        let removed = self
            .conn()
            .execute("DELETE FROM module_errors WHERE recorded_at <= ?1;", [cutoff])?;
        Ok(removed)
    }
}

pub(crate) fn upsert_error_in(conn: &Connection, record: &ModuleErrorRecord) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO module_errors (
            module_id,
            module_name,
            kind,
            message,
            recorded_at,
            session_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(module_id) DO UPDATE SET
            module_name = excluded.module_name,
            kind = excluded.kind,
            message = excluded.message,
            recorded_at = excluded.recorded_at,
            session_id = excluded.session_id;",
        params![
            record.module_id.as_str(),
            record.module_name.as_str(),
            record.kind.as_str(),
            record.message.as_str(),
            record.recorded_at,
            record.session_id.map(|id| id.to_string()),
        ],
    )?;
    Ok(())
}

fn parse_error_row(row: &Row<'_>) -> RepoResult<ModuleErrorRecord> {
    let kind_text: String = row.get("kind")?;
    let kind = FaultKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid fault kind `{kind_text}` in module_errors.kind"))
    })?;

    let session_id = match row.get::<_, Option<String>>("session_id")? {
        Some(value) => Some(Uuid::parse_str(&value).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid session id `{value}` in module_errors.session_id"
            ))
        })?),
        None => None,
    };

    Ok(ModuleErrorRecord {
        module_id: row.get("module_id")?,
        module_name: row.get("module_name")?,
        kind,
        message: row.get("message")?,
        recorded_at: row.get("recorded_at")?,
        session_id,
    })
}
