use accolade::core::deadline::Deadline;
use accolade::core::store::Store;
use accolade::plugins::audit::{AuditEntry, AuditEvent, AuditRecorder, SqliteAuditRecorder};
use accolade::plugins::references::SqliteReferenceStore;
use serde_json::json;
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, SqliteAuditRecorder) {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let audit = SqliteAuditRecorder::new(store.audit_db_path());
    audit.initialize(&Deadline::default()).unwrap();
    (tmp, audit)
}

#[test]
fn entries_round_trip_with_snapshots() {
    let (_tmp, audit) = setup();
    let ctx = Deadline::default();
    let entry = AuditEntry::new("achievement_reference", "ach_1", AuditEvent::StatusChanged)
        .by("usr_vic", "verifier")
        .previous(json!({"status": "submitted"}))
        .current(json!({"status": "verified", "verified_by": "usr_vic"}))
        .metadata(json!({"source": "cli"}));
    audit.create(&ctx, &entry).unwrap();

    let listed = audit
        .list_by_entity(&ctx, "achievement_reference", "ach_1", 0, 0)
        .unwrap();
    assert_eq!(listed, vec![entry]);
}

#[test]
fn history_is_newest_first_and_scoped_to_the_entity() {
    let (_tmp, audit) = setup();
    let ctx = Deadline::default();
    let events = [
        AuditEvent::Created,
        AuditEvent::Updated,
        AuditEvent::StatusChanged,
    ];
    for event in events {
        audit
            .create(&ctx, &AuditEntry::new("achievement_reference", "ach_1", event))
            .unwrap();
    }
    audit
        .create(
            &ctx,
            &AuditEntry::new("achievement_reference", "ach_2", AuditEvent::Created),
        )
        .unwrap();

    let history: Vec<AuditEvent> = audit
        .list_by_entity(&ctx, "achievement_reference", "ach_1", 0, 0)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        history,
        vec![AuditEvent::StatusChanged, AuditEvent::Updated, AuditEvent::Created]
    );

    let paged = audit
        .list_by_entity(&ctx, "achievement_reference", "ach_1", 1, 1)
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].event_type, AuditEvent::Updated);
}

#[test]
fn audit_and_reference_schemas_share_one_file() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let ctx = Deadline::default();

    let refs = SqliteReferenceStore::new(store.reference_db_path());
    refs.initialize(&ctx).unwrap();
    let audit = SqliteAuditRecorder::new(store.audit_db_path());
    audit.initialize(&ctx).unwrap();

    audit
        .create(&ctx, &AuditEntry::new("achievement_reference", "ach_1", AuditEvent::Created))
        .unwrap();
    assert_eq!(
        audit
            .list_by_entity(&ctx, "achievement_reference", "ach_1", 10, 0)
            .unwrap()
            .len(),
        1
    );
}
