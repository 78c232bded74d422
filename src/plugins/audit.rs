//! Audit Recorder: append-only activity log kept beside the reference rows.

use crate::core::deadline::Deadline;
use crate::core::error::AccoladeError;
use crate::core::pool::{self, SqlitePool};
use crate::core::{db, schemas, time};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default number of entries returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Created,
    Updated,
    StatusChanged,
    Deleted,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::Created => "created",
            AuditEvent::Updated => "updated",
            AuditEvent::StatusChanged => "status_changed",
            AuditEvent::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AccoladeError> {
        match raw {
            "created" => Ok(AuditEvent::Created),
            "updated" => Ok(AuditEvent::Updated),
            "status_changed" => Ok(AuditEvent::StatusChanged),
            "deleted" => Ok(AuditEvent::Deleted),
            other => Err(AccoladeError::ValidationError(format!(
                "unknown audit event '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub event_type: AuditEvent,
    pub actor_id: Option<String>,
    pub actor_role: Option<String>,
    pub previous: Option<JsonValue>,
    pub current: Option<JsonValue>,
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(entity_type: &str, entity_id: &str, event_type: AuditEvent) -> Self {
        Self {
            id: time::new_event_id(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            event_type,
            actor_id: None,
            actor_role: None,
            previous: None,
            current: None,
            metadata: None,
            created_at: time::now(),
        }
    }

    pub fn by(mut self, actor_id: &str, actor_role: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self.actor_role = Some(actor_role.to_string());
        self
    }

    pub fn previous(mut self, value: JsonValue) -> Self {
        self.previous = Some(value);
        self
    }

    pub fn current(mut self, value: JsonValue) -> Self {
        self.current = Some(value);
        self
    }

    pub fn metadata(mut self, value: JsonValue) -> Self {
        self.metadata = Some(value);
        self
    }
}

pub trait AuditRecorder: Send + Sync {
    fn create(&self, ctx: &Deadline, entry: &AuditEntry) -> Result<(), AccoladeError>;

    /// History for one entity, newest first.
    fn list_by_entity(
        &self,
        ctx: &Deadline,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, AccoladeError>;
}

fn json_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<JsonValue>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let raw_event: String = row.get(3)?;
    let event_type = AuditEvent::parse(&raw_event).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(AuditEntry {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        event_type,
        actor_id: row.get(4)?,
        actor_role: row.get(5)?,
        previous: json_column(row, 6)?,
        current: json_column(row, 7)?,
        metadata: json_column(row, 8)?,
        created_at: time::column(row, 9)?,
    })
}

fn encode(value: &Option<JsonValue>) -> Result<Option<String>, AccoladeError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(AccoladeError::from)
}

pub fn ensure_schema(conn: &Connection) -> Result<(), AccoladeError> {
    if db::schema_version(conn, "audit")? >= schemas::AUDIT_SCHEMA_VERSION {
        return Ok(());
    }
    conn.execute(schemas::AUDIT_DB_SCHEMA_ACTIVITY_LOGS, [])?;
    conn.execute(schemas::AUDIT_DB_SCHEMA_INDEX_ENTITY, [])?;
    db::set_schema_version(conn, "audit", schemas::AUDIT_SCHEMA_VERSION)
}

pub struct SqliteAuditRecorder {
    db_path: PathBuf,
    pool: &'static SqlitePool,
}

impl SqliteAuditRecorder {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self::with_pool(db_path, pool::global_pool())
    }

    pub fn with_pool(db_path: impl Into<PathBuf>, pool: &'static SqlitePool) -> Self {
        Self {
            db_path: db_path.into(),
            pool,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn initialize(&self, ctx: &Deadline) -> Result<(), AccoladeError> {
        self.pool
            .with_write(&self.db_path, ctx, "audit.init", ensure_schema)
    }
}

impl AuditRecorder for SqliteAuditRecorder {
    fn create(&self, ctx: &Deadline, entry: &AuditEntry) -> Result<(), AccoladeError> {
        let previous = encode(&entry.previous)?;
        let current = encode(&entry.current)?;
        let metadata = encode(&entry.metadata)?;
        self.pool
            .with_write(&self.db_path, ctx, "audit.create", |conn| {
                conn.execute(
                    "INSERT INTO activity_logs(id, entity_type, entity_id, event_type, actor_id, actor_role, previous, current, metadata, created_at)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        entry.id,
                        entry.entity_type,
                        entry.entity_id,
                        entry.event_type.as_str(),
                        entry.actor_id,
                        entry.actor_role,
                        previous,
                        current,
                        metadata,
                        time::to_db(&entry.created_at),
                    ],
                )?;
                Ok(())
            })
    }

    fn list_by_entity(
        &self,
        ctx: &Deadline,
        entity_type: &str,
        entity_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, AccoladeError> {
        let limit = if limit <= 0 { DEFAULT_HISTORY_LIMIT } else { limit };
        let offset = offset.max(0);
        self.pool
            .with_read(&self.db_path, ctx, "audit.list_by_entity", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, entity_type, entity_id, event_type, actor_id, actor_role, previous, current, metadata, created_at
                     FROM activity_logs
                     WHERE entity_type = ?1 AND entity_id = ?2
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?3 OFFSET ?4",
                )?;
                let rows = stmt.query_map(params![entity_type, entity_id, limit, offset], map_entry)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
    }
}
