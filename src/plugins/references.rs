//! Reference Store: the authoritative status row for each achievement.
//!
//! Every workflow transition goes through [`ReferenceStore::transition`], a single
//! conditional `UPDATE ... WHERE id = ? AND status = ?`. Two writers that both
//! observed `draft` cannot both move it: the second matches zero rows and gets
//! `InvalidTransition`.

use crate::core::deadline::Deadline;
use crate::core::error::AccoladeError;
use crate::core::pool::{self, SqlitePool};
use crate::core::{db, schemas, time};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Draft,
    Submitted,
    Verified,
    Rejected,
    Deleted,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Draft,
        Status::Submitted,
        Status::Verified,
        Status::Rejected,
        Status::Deleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Submitted => "submitted",
            Status::Verified => "verified",
            Status::Rejected => "rejected",
            Status::Deleted => "deleted",
        }
    }

    /// Edges of the workflow graph. Nothing else is reachable.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Draft, Status::Submitted)
                | (Status::Draft, Status::Deleted)
                | (Status::Submitted, Status::Verified)
                | (Status::Submitted, Status::Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Verified | Status::Rejected | Status::Deleted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = AccoladeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AccoladeError::ValidationError(format!("unknown status '{}'", s)))
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        raw.parse()
            .map_err(|_| FromSqlError::Other(format!("unknown status '{}'", raw).into()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AchievementReference {
    pub id: String,
    pub student_id: String,
    /// String form of the document key; decoded (and possibly rejected) at use.
    pub document_key: String,
    pub status: Status,
    pub submitted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by: Option<String>,
    pub rejection_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AchievementReference {
    pub fn new_draft(student_id: &str, document_key: &str) -> Self {
        let ts = time::now();
        Self {
            id: format!("ach_{}", Ulid::new()),
            student_id: student_id.to_string(),
            document_key: document_key.to_string(),
            status: Status::Draft,
            submitted_at: None,
            verified_at: None,
            verified_by: None,
            rejection_note: None,
            created_at: ts,
            updated_at: ts,
        }
    }
}

/// A requested move along the workflow graph, applied only if the row is still in `from`.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub from: Status,
    pub to: Status,
    /// Recorded as `verified_by` on review outcomes (verified, rejected).
    pub reviewer_id: Option<String>,
    pub rejection_note: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(from: Status, to: Status) -> Self {
        Self {
            from,
            to,
            reviewer_id: None,
            rejection_note: None,
            at: time::now(),
        }
    }

    pub fn reviewed_by(mut self, reviewer_id: &str) -> Self {
        self.reviewer_id = Some(reviewer_id.to_string());
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.rejection_note = Some(note.to_string());
        self
    }
}

pub trait ReferenceStore: Send + Sync {
    /// Insert a new row; `DuplicateKey` if the id already exists.
    fn create(&self, ctx: &Deadline, reference: &AchievementReference) -> Result<(), AccoladeError>;

    fn get_by_id(&self, ctx: &Deadline, id: &str) -> Result<AchievementReference, AccoladeError>;

    /// Conditional status write. Returns the row as stored after the change.
    fn transition(
        &self,
        ctx: &Deadline,
        id: &str,
        change: &StatusChange,
    ) -> Result<AchievementReference, AccoladeError>;

    /// Bump `updated_at` only while the row is still in `expected`.
    fn touch(&self, ctx: &Deadline, id: &str, expected: Status) -> Result<DateTime<Utc>, AccoladeError>;

    /// Unconditional status write. Stamps verified_at/verified_by when a verifier is given.
    fn update_status(
        &self,
        ctx: &Deadline,
        id: &str,
        status: Status,
        verifier_id: Option<&str>,
    ) -> Result<(), AccoladeError>;

    /// Unconditional write of `status = rejected` together with the note.
    fn update_rejection_note(&self, ctx: &Deadline, id: &str, note: &str) -> Result<(), AccoladeError>;

    fn list_by_student(
        &self,
        ctx: &Deadline,
        student_id: &str,
    ) -> Result<Vec<AchievementReference>, AccoladeError>;

    fn list_all(&self, ctx: &Deadline) -> Result<Vec<AchievementReference>, AccoladeError>;

    /// Physical removal. Only the hard-purge path may call this.
    fn delete(&self, ctx: &Deadline, id: &str) -> Result<(), AccoladeError>;
}

const SELECT_COLUMNS: &str = "SELECT id, student_id, document_key, status, submitted_at, verified_at, verified_by, rejection_note, created_at, updated_at
     FROM achievement_references";

fn map_reference(row: &rusqlite::Row<'_>) -> rusqlite::Result<AchievementReference> {
    Ok(AchievementReference {
        id: row.get(0)?,
        student_id: row.get(1)?,
        document_key: row.get(2)?,
        status: row.get(3)?,
        submitted_at: time::optional_column(row, 4)?,
        verified_at: time::optional_column(row, 5)?,
        verified_by: row.get(6)?,
        rejection_note: row.get(7)?,
        created_at: time::column(row, 8)?,
        updated_at: time::column(row, 9)?,
    })
}

fn fetch(conn: &Connection, id: &str) -> Result<Option<AchievementReference>, AccoladeError> {
    let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
    Ok(conn.query_row(&sql, params![id], map_reference).optional()?)
}

fn fetch_status(conn: &Connection, id: &str) -> Result<Option<Status>, AccoladeError> {
    Ok(conn
        .query_row(
            "SELECT status FROM achievement_references WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?)
}

fn not_found(id: &str) -> AccoladeError {
    AccoladeError::NotFound(format!("achievement reference {}", id))
}

fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == ErrorCode::ConstraintViolation
                && (failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}

pub fn ensure_schema(conn: &Connection) -> Result<(), AccoladeError> {
    if db::schema_version(conn, "references")? >= schemas::REFERENCE_SCHEMA_VERSION {
        return Ok(());
    }
    conn.execute(schemas::REFERENCE_DB_SCHEMA_REFERENCES, [])?;
    conn.execute(schemas::REFERENCE_DB_SCHEMA_INDEX_STUDENT, [])?;
    conn.execute(schemas::REFERENCE_DB_SCHEMA_INDEX_CREATED, [])?;
    db::set_schema_version(conn, "references", schemas::REFERENCE_SCHEMA_VERSION)
}

/// SQLite-backed Reference Store.
pub struct SqliteReferenceStore {
    db_path: PathBuf,
    pool: &'static SqlitePool,
}

impl SqliteReferenceStore {
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
            .with_write(&self.db_path, ctx, "references.init", ensure_schema)
    }
}

impl ReferenceStore for SqliteReferenceStore {
    fn create(&self, ctx: &Deadline, reference: &AchievementReference) -> Result<(), AccoladeError> {
        self.pool
            .with_write(&self.db_path, ctx, "references.create", |conn| {
                conn.execute(
                    "INSERT INTO achievement_references(id, student_id, document_key, status, submitted_at, verified_at, verified_by, rejection_note, created_at, updated_at)
                     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        reference.id,
                        reference.student_id,
                        reference.document_key,
                        reference.status,
                        reference.submitted_at.as_ref().map(time::to_db),
                        reference.verified_at.as_ref().map(time::to_db),
                        reference.verified_by,
                        reference.rejection_note,
                        time::to_db(&reference.created_at),
                        time::to_db(&reference.updated_at),
                    ],
                )
                .map_err(|e| {
                    if is_duplicate_key(&e) {
                        AccoladeError::DuplicateKey(format!("achievement reference {}", reference.id))
                    } else {
                        AccoladeError::RusqliteError(e)
                    }
                })?;
                Ok(())
            })
    }

    fn get_by_id(&self, ctx: &Deadline, id: &str) -> Result<AchievementReference, AccoladeError> {
        self.pool
            .with_read(&self.db_path, ctx, "references.get", |conn| fetch(conn, id))?
            .ok_or_else(|| not_found(id))
    }

    fn transition(
        &self,
        ctx: &Deadline,
        id: &str,
        change: &StatusChange,
    ) -> Result<AchievementReference, AccoladeError> {
        if !change.from.can_transition_to(change.to) {
            return Err(AccoladeError::InvalidTransition {
                from: change.from.to_string(),
                to: change.to.to_string(),
            });
        }
        self.pool
            .with_write(&self.db_path, ctx, "references.transition", |conn| {
                let changed = conn.execute(
                    "UPDATE achievement_references
                     SET status = ?1,
                         updated_at = ?2,
                         submitted_at = CASE WHEN ?1 = 'submitted' THEN ?2 ELSE submitted_at END,
                         verified_at = CASE WHEN ?1 = 'verified' THEN ?2 ELSE verified_at END,
                         verified_by = CASE WHEN ?1 IN ('verified', 'rejected') THEN ?3 ELSE verified_by END,
                         rejection_note = CASE WHEN ?1 = 'rejected' THEN ?4 ELSE rejection_note END
                     WHERE id = ?5 AND status = ?6",
                    params![
                        change.to,
                        time::to_db(&change.at),
                        change.reviewer_id,
                        change.rejection_note,
                        id,
                        change.from,
                    ],
                )?;
                if changed == 0 {
                    return Err(match fetch_status(conn, id)? {
                        None => not_found(id),
                        Some(actual) => AccoladeError::InvalidTransition {
                            from: actual.to_string(),
                            to: change.to.to_string(),
                        },
                    });
                }
                fetch(conn, id)?.ok_or_else(|| not_found(id))
            })
    }

    fn touch(&self, ctx: &Deadline, id: &str, expected: Status) -> Result<DateTime<Utc>, AccoladeError> {
        let ts = time::now();
        self.pool
            .with_write(&self.db_path, ctx, "references.touch", |conn| {
                let changed = conn.execute(
                    "UPDATE achievement_references SET updated_at = ?1 WHERE id = ?2 AND status = ?3",
                    params![time::to_db(&ts), id, expected],
                )?;
                if changed == 0 {
                    return Err(match fetch_status(conn, id)? {
                        None => not_found(id),
                        Some(actual) => AccoladeError::InvalidTransition {
                            from: actual.to_string(),
                            to: expected.to_string(),
                        },
                    });
                }
                Ok(ts)
            })
    }

    fn update_status(
        &self,
        ctx: &Deadline,
        id: &str,
        status: Status,
        verifier_id: Option<&str>,
    ) -> Result<(), AccoladeError> {
        let ts = time::to_db(&time::now());
        self.pool
            .with_write(&self.db_path, ctx, "references.update_status", |conn| {
                let changed = match verifier_id {
                    Some(verifier) => conn.execute(
                        "UPDATE achievement_references SET status = ?1, verified_by = ?2, verified_at = ?3, updated_at = ?3 WHERE id = ?4",
                        params![status, verifier, ts, id],
                    )?,
                    None => conn.execute(
                        "UPDATE achievement_references SET status = ?1, updated_at = ?2 WHERE id = ?3",
                        params![status, ts, id],
                    )?,
                };
                if changed == 0 {
                    return Err(not_found(id));
                }
                Ok(())
            })
    }

    fn update_rejection_note(&self, ctx: &Deadline, id: &str, note: &str) -> Result<(), AccoladeError> {
        let ts = time::to_db(&time::now());
        self.pool
            .with_write(&self.db_path, ctx, "references.update_rejection_note", |conn| {
                let changed = conn.execute(
                    "UPDATE achievement_references SET rejection_note = ?1, status = 'rejected', updated_at = ?2 WHERE id = ?3",
                    params![note, ts, id],
                )?;
                if changed == 0 {
                    return Err(not_found(id));
                }
                Ok(())
            })
    }

    fn list_by_student(
        &self,
        ctx: &Deadline,
        student_id: &str,
    ) -> Result<Vec<AchievementReference>, AccoladeError> {
        self.pool
            .with_read(&self.db_path, ctx, "references.list_by_student", |conn| {
                let sql = format!(
                    "{} WHERE student_id = ?1 ORDER BY created_at DESC, rowid DESC",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![student_id], map_reference)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
    }

    fn list_all(&self, ctx: &Deadline) -> Result<Vec<AchievementReference>, AccoladeError> {
        self.pool
            .with_read(&self.db_path, ctx, "references.list_all", |conn| {
                let sql = format!("{} ORDER BY created_at DESC, rowid DESC", SELECT_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], map_reference)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
    }

    fn delete(&self, ctx: &Deadline, id: &str) -> Result<(), AccoladeError> {
        self.pool
            .with_write(&self.db_path, ctx, "references.delete", |conn| {
                let changed = conn.execute(
                    "DELETE FROM achievement_references WHERE id = ?1",
                    params![id],
                )?;
                if changed == 0 {
                    return Err(not_found(id));
                }
                Ok(())
            })
    }
}
