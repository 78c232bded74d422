use accolade::core::deadline::Deadline;
use accolade::core::error::AccoladeError;
use accolade::core::store::Store;
use accolade::plugins::references::{
    AchievementReference, ReferenceStore, SqliteReferenceStore, Status, StatusChange,
};
use std::thread;
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, SqliteReferenceStore) {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let refs = SqliteReferenceStore::new(store.reference_db_path());
    refs.initialize(&Deadline::default()).unwrap();
    (tmp, refs)
}

fn draft(refs: &SqliteReferenceStore, student: &str) -> AchievementReference {
    let r = AchievementReference::new_draft(student, &ulid::Ulid::new().to_string());
    refs.create(&Deadline::default(), &r).unwrap();
    r
}

#[test]
fn create_then_get_round_trips_every_field() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    let r = draft(&refs, "stu_ana");
    let loaded = refs.get_by_id(&ctx, &r.id).unwrap();
    assert_eq!(loaded, r);
}

#[test]
fn duplicate_id_is_rejected() {
    let (_tmp, refs) = setup();
    let r = draft(&refs, "stu_ana");
    let err = refs.create(&Deadline::default(), &r).unwrap_err();
    assert!(matches!(err, AccoladeError::DuplicateKey(_)));
}

#[test]
fn missing_reference_is_not_found() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    assert!(matches!(
        refs.get_by_id(&ctx, "ach_missing"),
        Err(AccoladeError::NotFound(_))
    ));
    assert!(matches!(
        refs.transition(&ctx, "ach_missing", &StatusChange::new(Status::Draft, Status::Submitted)),
        Err(AccoladeError::NotFound(_))
    ));
    assert!(matches!(
        refs.delete(&ctx, "ach_missing"),
        Err(AccoladeError::NotFound(_))
    ));
}

#[test]
fn transition_stamps_workflow_timestamps() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    let r = draft(&refs, "stu_ana");

    let submitted = refs
        .transition(&ctx, &r.id, &StatusChange::new(Status::Draft, Status::Submitted))
        .unwrap();
    assert_eq!(submitted.status, Status::Submitted);
    assert!(submitted.submitted_at.is_some());
    assert!(submitted.verified_at.is_none());

    let verified = refs
        .transition(
            &ctx,
            &r.id,
            &StatusChange::new(Status::Submitted, Status::Verified).reviewed_by("usr_vic"),
        )
        .unwrap();
    assert_eq!(verified.status, Status::Verified);
    assert_eq!(verified.verified_by.as_deref(), Some("usr_vic"));
    assert!(verified.verified_at.is_some());
    assert_eq!(verified.submitted_at, submitted.submitted_at);
}

#[test]
fn rejection_records_reviewer_and_note_but_not_verified_at() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    let r = draft(&refs, "stu_ana");
    refs.transition(&ctx, &r.id, &StatusChange::new(Status::Draft, Status::Submitted))
        .unwrap();
    let rejected = refs
        .transition(
            &ctx,
            &r.id,
            &StatusChange::new(Status::Submitted, Status::Rejected)
                .reviewed_by("usr_vic")
                .with_note("incomplete evidence"),
        )
        .unwrap();
    assert_eq!(rejected.rejection_note.as_deref(), Some("incomplete evidence"));
    assert_eq!(rejected.verified_by.as_deref(), Some("usr_vic"));
    assert!(rejected.verified_at.is_none());
}

#[test]
fn stale_source_status_is_an_invalid_transition_reporting_the_actual_status() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    let r = draft(&refs, "stu_ana");
    refs.transition(&ctx, &r.id, &StatusChange::new(Status::Draft, Status::Submitted))
        .unwrap();

    let err = refs
        .transition(&ctx, &r.id, &StatusChange::new(Status::Draft, Status::Submitted))
        .unwrap_err();
    match err {
        AccoladeError::InvalidTransition { from, to } => {
            assert_eq!(from, "submitted");
            assert_eq!(to, "submitted");
        }
        other => panic!("expected InvalidTransition, got {:?}", other),
    }
    assert_eq!(refs.get_by_id(&ctx, &r.id).unwrap().status, Status::Submitted);
}

#[test]
fn illegal_edges_never_reach_the_store() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    let r = draft(&refs, "stu_ana");
    for (from, to) in [
        (Status::Draft, Status::Verified),
        (Status::Verified, Status::Draft),
        (Status::Deleted, Status::Submitted),
        (Status::Rejected, Status::Submitted),
    ] {
        let err = refs
            .transition(&ctx, &r.id, &StatusChange::new(from, to))
            .unwrap_err();
        assert!(matches!(err, AccoladeError::InvalidTransition { .. }));
    }
    assert_eq!(refs.get_by_id(&ctx, &r.id).unwrap().status, Status::Draft);
}

#[test]
fn concurrent_transitions_from_one_source_have_one_winner() {
    let (_tmp, refs) = setup();
    let r = draft(&refs, "stu_ana");

    let results: Vec<Result<AchievementReference, AccoladeError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    refs.transition(
                        &Deadline::default(),
                        &r.id,
                        &StatusChange::new(Status::Draft, Status::Submitted),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AccoladeError::InvalidTransition { .. }))
    );
}

#[test]
fn touch_is_conditional_on_status() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    let r = draft(&refs, "stu_ana");
    let ts = refs.touch(&ctx, &r.id, Status::Draft).unwrap();
    assert!(ts >= r.updated_at);
    assert_eq!(refs.get_by_id(&ctx, &r.id).unwrap().updated_at, ts);

    refs.transition(&ctx, &r.id, &StatusChange::new(Status::Draft, Status::Submitted))
        .unwrap();
    assert!(matches!(
        refs.touch(&ctx, &r.id, Status::Draft),
        Err(AccoladeError::InvalidTransition { .. })
    ));
}

#[test]
fn unconditional_writes_still_report_missing_rows() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    let r = draft(&refs, "stu_ana");

    refs.update_status(&ctx, &r.id, Status::Verified, Some("usr_vic"))
        .unwrap();
    let loaded = refs.get_by_id(&ctx, &r.id).unwrap();
    assert_eq!(loaded.verified_by.as_deref(), Some("usr_vic"));
    assert!(loaded.verified_at.is_some());

    refs.update_rejection_note(&ctx, &r.id, "duplicate claim").unwrap();
    let loaded = refs.get_by_id(&ctx, &r.id).unwrap();
    assert_eq!(loaded.status, Status::Rejected);
    assert_eq!(loaded.rejection_note.as_deref(), Some("duplicate claim"));

    assert!(matches!(
        refs.update_status(&ctx, "ach_missing", Status::Draft, None),
        Err(AccoladeError::NotFound(_))
    ));
    assert!(matches!(
        refs.update_rejection_note(&ctx, "ach_missing", "x"),
        Err(AccoladeError::NotFound(_))
    ));
}

#[test]
fn lists_are_newest_first() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    let first = draft(&refs, "stu_ana");
    let second = draft(&refs, "stu_ben");
    let third = draft(&refs, "stu_ana");

    let ana: Vec<String> = refs
        .list_by_student(&ctx, "stu_ana")
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ana, vec![third.id.clone(), first.id.clone()]);

    let all: Vec<String> = refs.list_all(&ctx).unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(all, vec![third.id, second.id, first.id]);
    assert!(refs.list_by_student(&ctx, "stu_nobody").unwrap().is_empty());
}

#[test]
fn physical_delete_removes_the_row() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::default();
    let r = draft(&refs, "stu_ana");
    refs.delete(&ctx, &r.id).unwrap();
    assert!(matches!(
        refs.get_by_id(&ctx, &r.id),
        Err(AccoladeError::NotFound(_))
    ));
}

#[test]
fn expired_deadline_refuses_store_calls() {
    let (_tmp, refs) = setup();
    let ctx = Deadline::new(std::time::Duration::ZERO);
    assert!(matches!(
        refs.list_all(&ctx),
        Err(AccoladeError::Timeout(_))
    ));
}
