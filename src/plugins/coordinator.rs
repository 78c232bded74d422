//! Cross-store coordinator for the achievement workflow.
//!
//! A claimed achievement is two records: its content in the Document Store and
//! its authoritative status row in the Reference Store. The two stores never
//! share a transaction, so every operation here is a short saga:
//!
//! 1. load and guard against the reference row (existence, ownership or
//!    permission, legal source status)
//! 2. mutate the stores; status changes are conditional writes
//! 3. record an audit entry on a fresh budget; failures are logged and counted
//!
//! `create_draft` is the only operation with compensation: when the reference
//! insert fails, the freshly written document is tombstoned again.
//!
//! Operations that leave `draft` or write draft content hold a per-reference
//! lock for the whole saga, so a content write never lands after a submit or a
//! delete issued through the same coordinator. Content writes also claim the
//! draft status with a conditional `touch` before the document is written.
//!
//! When the stores disagree, the reference status wins.

use crate::core::deadline::Deadline;
use crate::core::error::AccoladeError;
use crate::core::store::Store;
use crate::plugins::audit::{AuditEntry, AuditEvent, AuditRecorder, SqliteAuditRecorder};
use crate::plugins::directory::{Actor, AuthorizationContext};
use crate::plugins::documents::{
    AchievementContent, AchievementDocument, Attachment, DocumentKey, DocumentPatch,
    DocumentStore, NewDocument, SqliteDocumentStore,
};
use crate::plugins::references::{
    AchievementReference, ReferenceStore, SqliteReferenceStore, Status, StatusChange,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{info, warn};

pub const VERIFY_PERMISSION: &str = "achievement:verify";
pub const PURGE_PERMISSION: &str = "achievement:purge";
pub const ENTITY_TYPE: &str = "achievement_reference";

/// Budget for audit writes and compensation, independent of the caller's.
pub const FOLLOW_UP_BUDGET: Duration = Duration::from_secs(2);

/// In-process mutual exclusion keyed by reference id.
#[derive(Default)]
struct ReferenceLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

struct ReferenceLock<'a> {
    locks: &'a ReferenceLocks,
    id: String,
}

impl ReferenceLocks {
    /// Wait for `id` until the deadline runs out.
    fn acquire(&self, ctx: &Deadline, id: &str, op: &str) -> Result<ReferenceLock<'_>, AccoladeError> {
        // The set only names held ids; a panicking holder still releases on drop.
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        while held.contains(id) {
            let left = ctx.remaining(op)?;
            held = self
                .released
                .wait_timeout(held, left)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|p| p.into_inner().0);
        }
        held.insert(id.to_string());
        Ok(ReferenceLock {
            locks: self,
            id: id.to_string(),
        })
    }
}

impl Drop for ReferenceLock<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|p| p.into_inner());
        held.remove(&self.id);
        self.locks.released.notify_all();
    }
}

pub struct Coordinator {
    references: Arc<dyn ReferenceStore>,
    documents: Arc<dyn DocumentStore>,
    audit: Arc<dyn AuditRecorder>,
    authz: Arc<dyn AuthorizationContext>,
    follow_up_budget: Duration,
    audit_failures: AtomicU64,
    compensation_failures: AtomicU64,
    locks: ReferenceLocks,
}

impl Coordinator {
    pub fn new(
        references: Arc<dyn ReferenceStore>,
        documents: Arc<dyn DocumentStore>,
        audit: Arc<dyn AuditRecorder>,
        authz: Arc<dyn AuthorizationContext>,
    ) -> Self {
        Self {
            references,
            documents,
            audit,
            authz,
            follow_up_budget: FOLLOW_UP_BUDGET,
            audit_failures: AtomicU64::new(0),
            compensation_failures: AtomicU64::new(0),
            locks: ReferenceLocks::default(),
        }
    }

    /// Open the SQLite-backed stores under `store`, creating schemas as needed.
    pub fn open(
        store: &Store,
        authz: Arc<dyn AuthorizationContext>,
        ctx: &Deadline,
    ) -> Result<Self, AccoladeError> {
        let references = SqliteReferenceStore::new(store.reference_db_path());
        references.initialize(ctx)?;
        let documents = SqliteDocumentStore::new(store.document_db_path());
        documents.initialize(ctx)?;
        let audit = SqliteAuditRecorder::new(store.audit_db_path());
        audit.initialize(ctx)?;
        Ok(Self::new(
            Arc::new(references),
            Arc::new(documents),
            Arc::new(audit),
            authz,
        ))
    }

    pub fn with_follow_up_budget(mut self, budget: Duration) -> Self {
        self.follow_up_budget = budget;
        self
    }

    /// Audit writes that failed and were swallowed.
    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    /// CreateDraft compensations (document tombstoning) that failed.
    pub fn compensation_failures(&self) -> u64 {
        self.compensation_failures.load(Ordering::Relaxed)
    }

    // --- Guards ---

    fn owned_reference(
        &self,
        ctx: &Deadline,
        ref_id: &str,
        actor: &Actor,
    ) -> Result<AchievementReference, AccoladeError> {
        let reference = self.references.get_by_id(ctx, ref_id)?;
        let profile = self
            .authz
            .resolve_student_profile(&actor.id)?
            .ok_or_else(|| {
                AccoladeError::NotOwner(format!("{} has no student profile", actor.id))
            })?;
        if profile.id != reference.student_id {
            return Err(AccoladeError::NotOwner(format!(
                "{} does not own {}",
                actor.id, reference.id
            )));
        }
        Ok(reference)
    }

    fn require_permission(&self, actor: &Actor, permission: &str) -> Result<(), AccoladeError> {
        if self.authz.has_permission(&actor.role_id, permission)? {
            Ok(())
        } else {
            Err(AccoladeError::Unauthorized(format!(
                "role {} lacks {}",
                actor.role_id, permission
            )))
        }
    }

    fn require_status(reference: &AchievementReference, expected: Status, to: Status) -> Result<(), AccoladeError> {
        if reference.status != expected {
            return Err(AccoladeError::InvalidTransition {
                from: reference.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    // --- Side effects ---

    fn record(&self, ctx: &Deadline, entry: AuditEntry) {
        let follow_up = ctx.detached(self.follow_up_budget);
        if let Err(err) = self.audit.create(&follow_up, &entry) {
            self.audit_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                entity_id = %entry.entity_id,
                event = %entry.event_type,
                error = %err,
                "audit write failed"
            );
        }
    }

    fn compensate_create(&self, ctx: &Deadline, key: &DocumentKey) {
        let follow_up = ctx.detached(self.follow_up_budget);
        if let Err(err) = self.documents.soft_delete(&follow_up, key) {
            self.compensation_failures.fetch_add(1, Ordering::Relaxed);
            warn!(document_key = %key, error = %err, "compensating document tombstone failed");
        }
    }

    fn entry(&self, reference_id: &str, event: AuditEvent, actor: &Actor) -> AuditEntry {
        AuditEntry::new(ENTITY_TYPE, reference_id, event).by(&actor.id, &actor.role_id)
    }

    // --- Workflow ---

    pub fn create_draft(
        &self,
        ctx: &Deadline,
        actor: &Actor,
        content: AchievementContent,
    ) -> Result<AchievementReference, AccoladeError> {
        for attachment in &content.attachments {
            attachment.validate()?;
        }
        let profile = self
            .authz
            .resolve_student_profile(&actor.id)?
            .ok_or_else(|| {
                AccoladeError::NotFound(format!("student profile for user {}", actor.id))
            })?;

        let key = self.documents.create(
            ctx,
            &NewDocument {
                student_id: profile.id.clone(),
                content,
                created_at: None,
            },
        )?;

        let reference = AchievementReference::new_draft(&profile.id, &key.to_string());
        if let Err(err) = self.references.create(ctx, &reference) {
            warn!(document_key = %key, error = %err, "reference insert failed, tombstoning document");
            self.compensate_create(ctx, &key);
            return Err(err);
        }

        info!(reference_id = %reference.id, student_id = %profile.id, "draft created");
        self.record(
            ctx,
            self.entry(&reference.id, AuditEvent::Created, actor)
                .current(json!({"status": reference.status, "document_key": reference.document_key})),
        );
        Ok(reference)
    }

    pub fn update_draft(
        &self,
        ctx: &Deadline,
        ref_id: &str,
        actor: &Actor,
        patch: &DocumentPatch,
    ) -> Result<(), AccoladeError> {
        if patch.is_empty() {
            return Err(AccoladeError::ValidationError("no fields to update".into()));
        }
        let _lock = self.locks.acquire(ctx, ref_id, "coordinator.update_draft")?;
        let reference = self.owned_reference(ctx, ref_id, actor)?;
        Self::require_status(&reference, Status::Draft, Status::Draft)?;
        let key = DocumentKey::parse(&reference.document_key)?;

        self.references.touch(ctx, ref_id, Status::Draft)?;
        self.documents.update(ctx, &key, patch)?;

        info!(reference_id = %ref_id, "draft updated");
        self.record(
            ctx,
            self.entry(ref_id, AuditEvent::Updated, actor)
                .current(patch.to_json()?),
        );
        Ok(())
    }

    pub fn add_attachment(
        &self,
        ctx: &Deadline,
        ref_id: &str,
        actor: &Actor,
        attachment: &Attachment,
    ) -> Result<(), AccoladeError> {
        attachment.validate()?;
        let _lock = self.locks.acquire(ctx, ref_id, "coordinator.add_attachment")?;
        let reference = self.owned_reference(ctx, ref_id, actor)?;
        Self::require_status(&reference, Status::Draft, Status::Draft)?;
        let key = DocumentKey::parse(&reference.document_key)?;

        self.references.touch(ctx, ref_id, Status::Draft)?;
        self.documents.add_attachment(ctx, &key, attachment)?;

        info!(reference_id = %ref_id, file = %attachment.file_name, "attachment added");
        self.record(
            ctx,
            self.entry(ref_id, AuditEvent::Updated, actor)
                .current(json!({"attachment": attachment}))
                .metadata(json!({"sub_resource": "attachments"})),
        );
        Ok(())
    }

    pub fn submit(&self, ctx: &Deadline, ref_id: &str, actor: &Actor) -> Result<(), AccoladeError> {
        let _lock = self.locks.acquire(ctx, ref_id, "coordinator.submit")?;
        let reference = self.owned_reference(ctx, ref_id, actor)?;
        Self::require_status(&reference, Status::Draft, Status::Submitted)?;

        let updated = self.references.transition(
            ctx,
            ref_id,
            &StatusChange::new(Status::Draft, Status::Submitted),
        )?;

        info!(reference_id = %ref_id, "submitted for verification");
        self.record(
            ctx,
            self.entry(ref_id, AuditEvent::StatusChanged, actor)
                .previous(json!({"status": Status::Draft}))
                .current(json!({"status": updated.status, "submitted_at": updated.submitted_at})),
        );
        Ok(())
    }

    pub fn verify(&self, ctx: &Deadline, ref_id: &str, verifier: &Actor) -> Result<(), AccoladeError> {
        let reference = self.references.get_by_id(ctx, ref_id)?;
        self.require_permission(verifier, VERIFY_PERMISSION)?;
        Self::require_status(&reference, Status::Submitted, Status::Verified)?;

        let updated = self.references.transition(
            ctx,
            ref_id,
            &StatusChange::new(Status::Submitted, Status::Verified).reviewed_by(&verifier.id),
        )?;

        info!(reference_id = %ref_id, verifier = %verifier.id, "verified");
        self.record(
            ctx,
            self.entry(ref_id, AuditEvent::StatusChanged, verifier)
                .previous(json!({"status": Status::Submitted}))
                .current(json!({
                    "status": updated.status,
                    "verified_at": updated.verified_at,
                    "verified_by": updated.verified_by,
                })),
        );
        Ok(())
    }

    pub fn reject(
        &self,
        ctx: &Deadline,
        ref_id: &str,
        verifier: &Actor,
        note: &str,
    ) -> Result<(), AccoladeError> {
        let note = note.trim();
        if note.is_empty() {
            return Err(AccoladeError::ValidationError(
                "a rejection note is required".into(),
            ));
        }
        let reference = self.references.get_by_id(ctx, ref_id)?;
        self.require_permission(verifier, VERIFY_PERMISSION)?;
        Self::require_status(&reference, Status::Submitted, Status::Rejected)?;

        let updated = self.references.transition(
            ctx,
            ref_id,
            &StatusChange::new(Status::Submitted, Status::Rejected)
                .reviewed_by(&verifier.id)
                .with_note(note),
        )?;

        info!(reference_id = %ref_id, verifier = %verifier.id, "rejected");
        self.record(
            ctx,
            self.entry(ref_id, AuditEvent::StatusChanged, verifier)
                .previous(json!({"status": Status::Submitted}))
                .current(json!({
                    "status": updated.status,
                    "rejection_note": updated.rejection_note,
                    "rejected_at": updated.updated_at,
                })),
        );
        Ok(())
    }

    /// Mark a draft deleted and tombstone its document.
    ///
    /// The reference is marked first, so a failure after that point never leaves
    /// a live reference pointing at a tombstoned document.
    pub fn delete_draft(&self, ctx: &Deadline, ref_id: &str, actor: &Actor) -> Result<(), AccoladeError> {
        let _lock = self.locks.acquire(ctx, ref_id, "coordinator.delete_draft")?;
        let reference = self.owned_reference(ctx, ref_id, actor)?;
        Self::require_status(&reference, Status::Draft, Status::Deleted)?;

        let updated = self.references.transition(
            ctx,
            ref_id,
            &StatusChange::new(Status::Draft, Status::Deleted),
        )?;
        let audit = self
            .entry(ref_id, AuditEvent::Deleted, actor)
            .previous(json!({"status": Status::Draft}))
            .current(json!({"status": updated.status, "deleted_at": updated.updated_at}));

        let key = match DocumentKey::parse(&reference.document_key) {
            Ok(key) => key,
            Err(err) => {
                warn!(reference_id = %ref_id, error = %err, "deleted reference holds a malformed document key");
                self.record(ctx, audit.metadata(json!({"document": "malformed_key"})));
                return Err(err);
            }
        };

        let outcome = match self.documents.soft_delete(ctx, &key) {
            Ok(()) => Ok(()),
            Err(AccoladeError::NotFound(_)) => {
                warn!(reference_id = %ref_id, document_key = %key, "document already missing at delete");
                Ok(())
            }
            Err(err) => Err(err),
        };

        info!(reference_id = %ref_id, "draft deleted");
        self.record(ctx, audit);
        outcome
    }

    /// Physically remove a reference that is already `deleted`. The tombstoned
    /// document is kept.
    pub fn purge(&self, ctx: &Deadline, ref_id: &str, actor: &Actor) -> Result<(), AccoladeError> {
        let reference = self.references.get_by_id(ctx, ref_id)?;
        self.require_permission(actor, PURGE_PERMISSION)?;
        if reference.status != Status::Deleted {
            return Err(AccoladeError::InvalidTransition {
                from: reference.status.to_string(),
                to: "purged".into(),
            });
        }
        self.references.delete(ctx, ref_id)?;

        info!(reference_id = %ref_id, "reference purged");
        self.record(
            ctx,
            self.entry(ref_id, AuditEvent::Deleted, actor)
                .previous(json!({"status": reference.status, "document_key": reference.document_key}))
                .metadata(json!({"hard_purge": true})),
        );
        Ok(())
    }

    // --- Reads ---

    /// The reference and, unless it is deleted, its live document.
    pub fn get_detail(
        &self,
        ctx: &Deadline,
        ref_id: &str,
    ) -> Result<(Option<AchievementDocument>, AchievementReference), AccoladeError> {
        let reference = self.references.get_by_id(ctx, ref_id)?;
        if reference.status == Status::Deleted {
            return Ok((None, reference));
        }
        let key = DocumentKey::parse(&reference.document_key)?;
        match self.documents.get_by_id(ctx, &key)? {
            Some(doc) => Ok((Some(doc), reference)),
            None => Err(AccoladeError::NotFound(format!(
                "document {} of live reference {}",
                key, ref_id
            ))),
        }
    }

    pub fn list_by_student(
        &self,
        ctx: &Deadline,
        student_id: &str,
    ) -> Result<Vec<AchievementReference>, AccoladeError> {
        self.references.list_by_student(ctx, student_id)
    }

    pub fn list_all(&self, ctx: &Deadline) -> Result<Vec<AchievementReference>, AccoladeError> {
        self.references.list_all(ctx)
    }

    pub fn list_documents(
        &self,
        ctx: &Deadline,
        student_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AchievementDocument>, AccoladeError> {
        self.documents.list_by_student(ctx, student_id, limit, offset)
    }

    pub fn history(
        &self,
        ctx: &Deadline,
        ref_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, AccoladeError> {
        self.audit.list_by_entity(ctx, ENTITY_TYPE, ref_id, limit, offset)
    }
}
