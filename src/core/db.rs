use crate::core::deadline::Deadline;
use crate::core::error;
use rusqlite::{Connection, ErrorCode};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

/// Statements are checked against the deadline every this many VM instructions.
const PROGRESS_CHECK_OPS: i32 = 1_000;

pub fn db_connect(db_path: &Path, busy_timeout: Duration) -> Result<Connection, error::AccoladeError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(error::AccoladeError::IoError)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)
        .map_err(error::AccoladeError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::AccoladeError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::AccoladeError::RusqliteError)?;
    Ok(conn)
}

/// Open a connection whose busy wait and statement runtime are bounded by `ctx`.
pub fn db_connect_within(
    db_path: &Path,
    ctx: &Deadline,
    op: &str,
) -> Result<Connection, error::AccoladeError> {
    let left = ctx.remaining(op)?;
    let conn = db_connect(db_path, left).map_err(|e| settle(ctx, op, e))?;
    let expires_at: Instant = ctx.expires_at();
    conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() >= expires_at))
        .map_err(|e| settle(ctx, op, error::AccoladeError::RusqliteError(e)))?;
    Ok(conn)
}

/// Map a store error observed under `ctx`: busy, locked and interrupted statements
/// past the deadline become `Timeout`, everything else passes through.
pub fn settle(ctx: &Deadline, op: &str, err: error::AccoladeError) -> error::AccoladeError {
    let error::AccoladeError::RusqliteError(inner) = err else {
        return err;
    };
    let code = inner.sqlite_error_code();
    let interrupted = code == Some(ErrorCode::OperationInterrupted);
    let contended = matches!(
        code,
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    );
    if interrupted || (contended && ctx.is_expired()) {
        return error::AccoladeError::Timeout(format!(
            "{} cancelled after the {}ms operation budget: {}",
            op,
            ctx.budget().as_millis(),
            inner
        ));
    }
    error::AccoladeError::RusqliteError(inner)
}

/// Read the schema version a component recorded in the `meta` table (0 when absent).
///
/// Components sharing one database file keep separate versions.
pub fn schema_version(conn: &Connection, component: &str) -> Result<u32, error::AccoladeError> {
    use rusqlite::OptionalExtension;
    conn.execute(crate::core::schemas::META_SCHEMA, [])?;
    let current: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            [format!("schema_version.{}", component)],
            |row| row.get(0),
        )
        .optional()
        .map_err(error::AccoladeError::RusqliteError)?;
    Ok(current
        .as_deref()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0))
}

pub fn set_schema_version(
    conn: &Connection,
    component: &str,
    version: u32,
) -> Result<(), error::AccoladeError> {
    conn.execute(
        "INSERT INTO meta(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [format!("schema_version.{}", component), version.to_string()],
    )?;
    Ok(())
}
