//! Store abstraction for accolade's state management.
//!
//! accolade keeps achievement state in two independent databases under one data
//! directory. They are deliberately separate files: nothing may assume a
//! transaction spans both.

use crate::core::schemas;
use std::path::{Path, PathBuf};

/// Store handle representing an accolade data directory.
///
/// - `references.db`: authoritative reference rows and the audit log
/// - `documents.db`: achievement documents
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute or working-directory-relative path to the data directory
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reference_db_path(&self) -> PathBuf {
        self.root.join(schemas::REFERENCE_DB_NAME)
    }

    pub fn document_db_path(&self) -> PathBuf {
        self.root.join(schemas::DOCUMENT_DB_NAME)
    }

    /// The audit log shares the reference database, like the activity log it replaces.
    pub fn audit_db_path(&self) -> PathBuf {
        self.reference_db_path()
    }
}
