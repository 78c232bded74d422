//! SQLite connection pool with read/write separation and deadline-bounded waits.
//!
//! - Maintains a **write gate** per DB so in-process writers queue instead of
//!   spinning on `SQLITE_BUSY`
//! - Creates fresh **read connections** per operation (no gate, concurrent via WAL)
//! - Bounds every wait (gate acquire, busy handler, statement runtime) by the
//!   caller's `Deadline`; an exhausted budget surfaces as `Timeout`
//!
//! Connections are NOT pooled (opened fresh each time) so that every connection
//! carries the busy timeout and progress handler of the operation that opened it.
//! The gate is a throughput measure only: status transitions stay correct without
//! it because they are conditional writes.

use crate::core::db;
use crate::core::deadline::Deadline;
use crate::core::error::AccoladeError;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, TryLockError};
use std::thread;
use std::time::Duration;

/// Base delay for exponential backoff while waiting on the write gate (milliseconds).
const BASE_DELAY_MS: u64 = 2;
/// Maximum delay cap (milliseconds).
const MAX_DELAY_MS: u64 = 50;

/// Per-database entry holding the write gate.
struct PoolEntry {
    write_gate: Mutex<()>,
    db_path: PathBuf,
}

/// Connection pool providing read/write separation per SQLite database.
pub struct SqlitePool {
    entries: Mutex<HashMap<PathBuf, Arc<PoolEntry>>>,
}

impl SqlitePool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get_entry(&self, db_path: &Path) -> Result<Arc<PoolEntry>, AccoladeError> {
        let key = db_path.to_path_buf();
        let mut entries = self.entries.lock().map_err(|_| {
            AccoladeError::ValidationError("SqlitePool entries lock poisoned".to_string())
        })?;
        let entry = entries.entry(key.clone()).or_insert_with(|| {
            Arc::new(PoolEntry {
                write_gate: Mutex::new(()),
                db_path: key,
            })
        });
        Ok(Arc::clone(entry))
    }

    /// Execute a closure with a write connection for the given DB path.
    /// Write access is serialized per-DB; waiting for the gate counts against `ctx`.
    pub fn with_write<F, R>(
        &self,
        db_path: &Path,
        ctx: &Deadline,
        op: &str,
        f: F,
    ) -> Result<R, AccoladeError>
    where
        F: FnOnce(&Connection) -> Result<R, AccoladeError>,
    {
        let entry = self.get_entry(db_path)?;
        let _guard = acquire_within(&entry.write_gate, ctx, op)?;
        let conn = db::db_connect_within(&entry.db_path, ctx, op)?;
        f(&conn).map_err(|e| db::settle(ctx, op, e))
    }

    /// Execute a closure with a read connection (no gate).
    pub fn with_read<F, R>(
        &self,
        db_path: &Path,
        ctx: &Deadline,
        op: &str,
        f: F,
    ) -> Result<R, AccoladeError>
    where
        F: FnOnce(&Connection) -> Result<R, AccoladeError>,
    {
        let conn = db::db_connect_within(db_path, ctx, op)?;
        f(&conn).map_err(|e| db::settle(ctx, op, e))
    }
}

impl Default for SqlitePool {
    fn default() -> Self {
        Self::new()
    }
}

fn acquire_within<'a>(
    gate: &'a Mutex<()>,
    ctx: &Deadline,
    op: &str,
) -> Result<MutexGuard<'a, ()>, AccoladeError> {
    let mut delay_ms = BASE_DELAY_MS;
    loop {
        match gate.try_lock() {
            Ok(guard) => return Ok(guard),
            // The gate guards no data, so a writer that panicked leaves nothing torn.
            Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                let left = ctx.remaining(op)?;
                thread::sleep(Duration::from_millis(delay_ms).min(left));
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

/// Process-wide pool shared by the SQLite-backed stores.
pub fn global_pool() -> &'static SqlitePool {
    static POOL: OnceLock<SqlitePool> = OnceLock::new();
    POOL.get_or_init(SqlitePool::new)
}
