//! Centralized database schema definitions.
//!
//! accolade keeps two SQLite databases that never share a transaction:
//! 1. references.db: authoritative achievement reference rows plus the audit log.
//! 2. documents.db: schemaless achievement documents (JSON bodies) with tombstones.

pub const META_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

// --- 1. Reference Bin ---
pub const REFERENCE_DB_NAME: &str = "references.db";
pub const REFERENCE_SCHEMA_VERSION: u32 = 1;

pub const REFERENCE_DB_SCHEMA_REFERENCES: &str = "
    CREATE TABLE IF NOT EXISTS achievement_references (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        document_key TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('draft', 'submitted', 'verified', 'rejected', 'deleted')),
        submitted_at TEXT,
        verified_at TEXT,
        verified_by TEXT,
        rejection_note TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";
pub const REFERENCE_DB_SCHEMA_INDEX_STUDENT: &str = "CREATE INDEX IF NOT EXISTS idx_references_student ON achievement_references(student_id, created_at)";
pub const REFERENCE_DB_SCHEMA_INDEX_CREATED: &str = "CREATE INDEX IF NOT EXISTS idx_references_created ON achievement_references(created_at)";

pub const AUDIT_DB_SCHEMA_ACTIVITY_LOGS: &str = "
    CREATE TABLE IF NOT EXISTS activity_logs (
        id TEXT PRIMARY KEY,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        actor_id TEXT,
        actor_role TEXT,
        previous TEXT, -- JSON object or NULL
        current TEXT, -- JSON object or NULL
        metadata TEXT, -- JSON object or NULL
        created_at TEXT NOT NULL
    )
";
pub const AUDIT_DB_SCHEMA_INDEX_ENTITY: &str = "CREATE INDEX IF NOT EXISTS idx_activity_logs_entity ON activity_logs(entity_type, entity_id, created_at)";
pub const AUDIT_SCHEMA_VERSION: u32 = 1;

// --- 2. Document Bin ---
pub const DOCUMENT_DB_NAME: &str = "documents.db";
pub const DOCUMENT_SCHEMA_VERSION: u32 = 1;

pub const DOCUMENT_DB_SCHEMA_DOCUMENTS: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        key TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        body TEXT NOT NULL CHECK (json_valid(body)),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        deleted_at TEXT
    )
";
pub const DOCUMENT_DB_SCHEMA_INDEX_STUDENT: &str = "CREATE INDEX IF NOT EXISTS idx_documents_student ON documents(student_id, created_at)";
pub const DOCUMENT_DB_SCHEMA_INDEX_DELETED: &str = "CREATE INDEX IF NOT EXISTS idx_documents_deleted ON documents(deleted_at)";
