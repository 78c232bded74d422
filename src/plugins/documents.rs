//! Document Store: schemaless achievement content keyed by a store-generated ULID.
//!
//! Bodies are JSON text. Field updates and attachment appends are single
//! `json_set`/`json_insert` statements, so a partial merge never rewrites fields
//! it was not given. Deletion only sets a tombstone.

use crate::core::deadline::Deadline;
use crate::core::error::AccoladeError;
use crate::core::pool::{self, SqlitePool};
use crate::core::{db, schemas, time};
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use ulid::Ulid;

/// Page size used when a caller passes a non-positive limit.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Fields a caller may change through an update. Everything else is store-managed.
pub const MUTABLE_FIELDS: [&str; 6] = ["title", "type", "category", "level", "details", "tags"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentKey(Ulid);

impl DocumentKey {
    pub fn generate() -> Self {
        DocumentKey(Ulid::new())
    }

    /// Decode the string form kept in a reference row.
    pub fn parse(raw: &str) -> Result<Self, AccoladeError> {
        Ulid::from_string(raw.trim())
            .map(DocumentKey)
            .map_err(|e| AccoladeError::MalformedReference(format!("document key '{}': {}", raw, e)))
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DocumentKey {
    type Error = AccoladeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DocumentKey::parse(&value)
    }
}

impl From<DocumentKey> for String {
    fn from(key: DocumentKey) -> Self {
        key.to_string()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub url: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

fn mime_pattern() -> &'static Regex {
    static MIME: OnceLock<Regex> = OnceLock::new();
    MIME.get_or_init(|| {
        Regex::new(r"(?i)^[a-z0-9][a-z0-9!#$&^_.+-]*/[a-z0-9][a-z0-9!#$&^_.+-]*$")
            .expect("MIME pattern is a valid regex")
    })
}

impl Attachment {
    pub fn validate(&self) -> Result<(), AccoladeError> {
        if self.file_name.trim().is_empty() {
            return Err(AccoladeError::ValidationError(
                "attachment file name is empty".into(),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(AccoladeError::ValidationError("attachment url is empty".into()));
        }
        if !mime_pattern().is_match(&self.mime_type) {
            return Err(AccoladeError::ValidationError(format!(
                "attachment MIME type '{}' is not of the form type/subtype",
                self.mime_type
            )));
        }
        Ok(())
    }
}

/// The free-form payload of an achievement.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AchievementContent {
    #[serde(default)]
    pub title: String,
    /// academic / non-academic / ...
    #[serde(rename = "type", default)]
    pub achievement_type: String,
    #[serde(default)]
    pub category: String,
    /// local / national / international
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub details: Map<String, JsonValue>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub student_id: String,
    pub content: AchievementContent,
    /// Stamped by the store when absent.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AchievementDocument {
    pub key: DocumentKey,
    pub student_id: String,
    #[serde(flatten)]
    pub content: AchievementContent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Whitelisted partial update. Absent fields are left untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DocumentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub achievement_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl DocumentPatch {
    /// Build a patch from a free-form field map, refusing anything outside
    /// [`MUTABLE_FIELDS`] (ids, owner, timestamps, attachments, status).
    pub fn from_fields(fields: &Map<String, JsonValue>) -> Result<Self, AccoladeError> {
        if let Some(bad) = fields
            .keys()
            .find(|k| !MUTABLE_FIELDS.contains(&k.as_str()))
        {
            return Err(AccoladeError::ValidationError(format!(
                "field '{}' cannot be updated (mutable fields: {})",
                bad,
                MUTABLE_FIELDS.join(", ")
            )));
        }
        serde_json::from_value(JsonValue::Object(fields.clone()))
            .map_err(|e| AccoladeError::ValidationError(format!("invalid field update: {}", e)))
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.achievement_type.is_none()
            && self.category.is_none()
            && self.level.is_none()
            && self.details.is_none()
            && self.tags.is_none()
    }

    /// The fields this patch sets, as a JSON object.
    pub fn to_json(&self) -> Result<JsonValue, AccoladeError> {
        Ok(serde_json::to_value(self)?)
    }

    /// `(json path, JSON-encoded value)` for each present field.
    fn assignments(&self) -> Result<Vec<(&'static str, String)>, AccoladeError> {
        let mut out = Vec::new();
        if let Some(v) = &self.title {
            out.push(("$.title", serde_json::to_string(v)?));
        }
        if let Some(v) = &self.achievement_type {
            out.push(("$.type", serde_json::to_string(v)?));
        }
        if let Some(v) = &self.category {
            out.push(("$.category", serde_json::to_string(v)?));
        }
        if let Some(v) = &self.level {
            out.push(("$.level", serde_json::to_string(v)?));
        }
        if let Some(v) = &self.details {
            out.push(("$.details", serde_json::to_string(v)?));
        }
        if let Some(v) = &self.tags {
            out.push(("$.tags", serde_json::to_string(v)?));
        }
        Ok(out)
    }
}

pub trait DocumentStore: Send + Sync {
    /// Insert a document and return its store-generated key.
    fn create(&self, ctx: &Deadline, doc: &NewDocument) -> Result<DocumentKey, AccoladeError>;

    /// `Ok(None)` when the key is unknown or tombstoned.
    fn get_by_id(
        &self,
        ctx: &Deadline,
        key: &DocumentKey,
    ) -> Result<Option<AchievementDocument>, AccoladeError>;

    /// Merge the patch into a live document; `NotFound` if none matches.
    fn update(&self, ctx: &Deadline, key: &DocumentKey, patch: &DocumentPatch) -> Result<(), AccoladeError>;

    /// Set the tombstone. The row is kept.
    fn soft_delete(&self, ctx: &Deadline, key: &DocumentKey) -> Result<(), AccoladeError>;

    /// Append to the attachment list of a live document.
    fn add_attachment(
        &self,
        ctx: &Deadline,
        key: &DocumentKey,
        attachment: &Attachment,
    ) -> Result<(), AccoladeError>;

    /// Live documents of a student, newest first.
    fn list_by_student(
        &self,
        ctx: &Deadline,
        student_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AchievementDocument>, AccoladeError>;
}

const SELECT_COLUMNS: &str =
    "SELECT key, student_id, body, created_at, updated_at, deleted_at FROM documents";

fn map_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<AchievementDocument> {
    let raw_key: String = row.get(0)?;
    let key = DocumentKey::parse(&raw_key).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let body: String = row.get(2)?;
    let content: AchievementContent = serde_json::from_str(&body).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(AchievementDocument {
        key,
        student_id: row.get(1)?,
        content,
        created_at: time::column(row, 3)?,
        updated_at: time::column(row, 4)?,
        deleted_at: time::optional_column(row, 5)?,
    })
}

fn not_found(key: &DocumentKey) -> AccoladeError {
    AccoladeError::NotFound(format!("achievement document {}", key))
}

pub fn ensure_schema(conn: &Connection) -> Result<(), AccoladeError> {
    if db::schema_version(conn, "documents")? >= schemas::DOCUMENT_SCHEMA_VERSION {
        return Ok(());
    }
    conn.execute(schemas::DOCUMENT_DB_SCHEMA_DOCUMENTS, [])?;
    conn.execute(schemas::DOCUMENT_DB_SCHEMA_INDEX_STUDENT, [])?;
    conn.execute(schemas::DOCUMENT_DB_SCHEMA_INDEX_DELETED, [])?;
    db::set_schema_version(conn, "documents", schemas::DOCUMENT_SCHEMA_VERSION)
}

/// SQLite-backed Document Store.
pub struct SqliteDocumentStore {
    db_path: PathBuf,
    pool: &'static SqlitePool,
}

impl SqliteDocumentStore {
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
            .with_write(&self.db_path, ctx, "documents.init", ensure_schema)
    }

    /// Lookup that also returns tombstoned documents (recovery and diagnostics).
    pub fn get_including_deleted(
        &self,
        ctx: &Deadline,
        key: &DocumentKey,
    ) -> Result<Option<AchievementDocument>, AccoladeError> {
        self.pool
            .with_read(&self.db_path, ctx, "documents.get_including_deleted", |conn| {
                let sql = format!("{} WHERE key = ?1", SELECT_COLUMNS);
                Ok(conn
                    .query_row(&sql, params![key.to_string()], map_document)
                    .optional()?)
            })
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn create(&self, ctx: &Deadline, doc: &NewDocument) -> Result<DocumentKey, AccoladeError> {
        let key = DocumentKey::generate();
        let body = serde_json::to_string(&doc.content)?;
        let now = time::now();
        let created_at = doc.created_at.unwrap_or(now);
        self.pool
            .with_write(&self.db_path, ctx, "documents.create", |conn| {
                conn.execute(
                    "INSERT INTO documents(key, student_id, body, created_at, updated_at, deleted_at)
                     VALUES(?1, ?2, ?3, ?4, ?5, NULL)",
                    params![
                        key.to_string(),
                        doc.student_id,
                        body,
                        time::to_db(&created_at),
                        time::to_db(&now)
                    ],
                )?;
                Ok(key)
            })
    }

    fn get_by_id(
        &self,
        ctx: &Deadline,
        key: &DocumentKey,
    ) -> Result<Option<AchievementDocument>, AccoladeError> {
        self.pool
            .with_read(&self.db_path, ctx, "documents.get", |conn| {
                let sql = format!("{} WHERE key = ?1 AND deleted_at IS NULL", SELECT_COLUMNS);
                Ok(conn
                    .query_row(&sql, params![key.to_string()], map_document)
                    .optional()?)
            })
    }

    fn update(&self, ctx: &Deadline, key: &DocumentKey, patch: &DocumentPatch) -> Result<(), AccoladeError> {
        let assignments = patch.assignments()?;
        let mut body_expr = String::from("body");
        if !assignments.is_empty() {
            let pairs: Vec<String> = assignments
                .iter()
                .enumerate()
                .map(|(i, (path, _))| format!("'{}', json(?{})", path, i + 3))
                .collect();
            body_expr = format!("json_set(body, {})", pairs.join(", "));
        }
        let sql = format!(
            "UPDATE documents SET body = {}, updated_at = ?1 WHERE key = ?2 AND deleted_at IS NULL",
            body_expr
        );
        let mut values = vec![time::to_db(&time::now()), key.to_string()];
        values.extend(assignments.into_iter().map(|(_, v)| v));

        self.pool
            .with_write(&self.db_path, ctx, "documents.update", |conn| {
                let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
                if changed == 0 {
                    return Err(not_found(key));
                }
                Ok(())
            })
    }

    fn soft_delete(&self, ctx: &Deadline, key: &DocumentKey) -> Result<(), AccoladeError> {
        let ts = time::to_db(&time::now());
        self.pool
            .with_write(&self.db_path, ctx, "documents.soft_delete", |conn| {
                let changed = conn.execute(
                    "UPDATE documents SET deleted_at = COALESCE(deleted_at, ?1), updated_at = ?1 WHERE key = ?2",
                    params![ts, key.to_string()],
                )?;
                if changed == 0 {
                    return Err(not_found(key));
                }
                Ok(())
            })
    }

    fn add_attachment(
        &self,
        ctx: &Deadline,
        key: &DocumentKey,
        attachment: &Attachment,
    ) -> Result<(), AccoladeError> {
        let encoded = serde_json::to_string(attachment)?;
        let ts = time::to_db(&time::now());
        self.pool
            .with_write(&self.db_path, ctx, "documents.add_attachment", |conn| {
                let changed = conn.execute(
                    "UPDATE documents
                     SET body = json_insert(body, '$.attachments[#]', json(?1)), updated_at = ?2
                     WHERE key = ?3 AND deleted_at IS NULL",
                    params![encoded, ts, key.to_string()],
                )?;
                if changed == 0 {
                    return Err(not_found(key));
                }
                Ok(())
            })
    }

    fn list_by_student(
        &self,
        ctx: &Deadline,
        student_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AchievementDocument>, AccoladeError> {
        let limit = if limit <= 0 { DEFAULT_PAGE_SIZE } else { limit };
        let offset = offset.max(0);
        self.pool
            .with_read(&self.db_path, ctx, "documents.list_by_student", |conn| {
                let sql = format!(
                    "{} WHERE student_id = ?1 AND deleted_at IS NULL
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![student_id, limit, offset], map_document)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
    }
}
