use accolade::core::deadline::Deadline;
use accolade::core::error::AccoladeError;
use accolade::core::store::Store;
use accolade::plugins::documents::{
    AchievementContent, Attachment, DocumentKey, DocumentPatch, DocumentStore, NewDocument,
    SqliteDocumentStore,
};
use serde_json::json;
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, SqliteDocumentStore) {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let docs = SqliteDocumentStore::new(store.document_db_path());
    docs.initialize(&Deadline::default()).unwrap();
    (tmp, docs)
}

fn content(title: &str) -> AchievementContent {
    let mut details = serde_json::Map::new();
    details.insert("organizer".into(), json!("Robotics League"));
    details.insert("rank".into(), json!(2));
    AchievementContent {
        title: title.to_string(),
        achievement_type: "competition".into(),
        category: "technology".into(),
        level: "national".into(),
        details,
        tags: vec!["robotics".into()],
        attachments: Vec::new(),
    }
}

fn create(docs: &SqliteDocumentStore, student: &str, title: &str) -> DocumentKey {
    docs.create(
        &Deadline::default(),
        &NewDocument {
            student_id: student.to_string(),
            content: content(title),
            created_at: None,
        },
    )
    .unwrap()
}

fn certificate() -> Attachment {
    Attachment {
        file_name: "certificate.pdf".into(),
        url: "https://files.example/certificate.pdf".into(),
        mime_type: "application/pdf".into(),
        size_bytes: 18_204,
    }
}

#[test]
fn create_stamps_timestamps_and_returns_a_fresh_key() {
    let (_tmp, docs) = setup();
    let ctx = Deadline::default();
    let a = create(&docs, "stu_ana", "Robotics Cup");
    let b = create(&docs, "stu_ana", "Robotics Cup");
    assert_ne!(a, b);

    let doc = docs.get_by_id(&ctx, &a).unwrap().unwrap();
    assert_eq!(doc.key, a);
    assert_eq!(doc.student_id, "stu_ana");
    assert_eq!(doc.content, content("Robotics Cup"));
    assert!(doc.created_at <= doc.updated_at);
    assert!(doc.deleted_at.is_none());
}

#[test]
fn explicit_created_at_is_kept() {
    let (_tmp, docs) = setup();
    let ctx = Deadline::default();
    let when = accolade::core::time::from_db("2025-03-01T09:00:00.000000Z").unwrap();
    let key = docs
        .create(
            &ctx,
            &NewDocument {
                student_id: "stu_ana".into(),
                content: content("Backdated"),
                created_at: Some(when),
            },
        )
        .unwrap();
    assert_eq!(docs.get_by_id(&ctx, &key).unwrap().unwrap().created_at, when);
}

#[test]
fn unknown_key_is_absent_not_an_error() {
    let (_tmp, docs) = setup();
    assert!(
        docs.get_by_id(&Deadline::default(), &DocumentKey::generate())
            .unwrap()
            .is_none()
    );
}

#[test]
fn update_merges_only_given_fields() {
    let (_tmp, docs) = setup();
    let ctx = Deadline::default();
    let key = create(&docs, "stu_ana", "Robotics Cup");
    let before = docs.get_by_id(&ctx, &key).unwrap().unwrap();

    let fields = json!({"title": "Regional Robotics Cup", "tags": ["robotics", "team"]});
    let patch = DocumentPatch::from_fields(fields.as_object().unwrap()).unwrap();
    docs.update(&ctx, &key, &patch).unwrap();

    let after = docs.get_by_id(&ctx, &key).unwrap().unwrap();
    assert_eq!(after.content.title, "Regional Robotics Cup");
    assert_eq!(after.content.tags, vec!["robotics", "team"]);
    assert_eq!(after.content.level, "national");
    assert_eq!(after.content.details, before.content.details);
    assert!(after.updated_at >= before.updated_at);
    assert_eq!(after.created_at, before.created_at);
}

#[test]
fn update_replaces_details_as_a_whole() {
    let (_tmp, docs) = setup();
    let ctx = Deadline::default();
    let key = create(&docs, "stu_ana", "Robotics Cup");
    let fields = json!({"details": {"rank": 1}});
    let patch = DocumentPatch::from_fields(fields.as_object().unwrap()).unwrap();
    docs.update(&ctx, &key, &patch).unwrap();
    let doc = docs.get_by_id(&ctx, &key).unwrap().unwrap();
    assert_eq!(serde_json::Value::Object(doc.content.details), json!({"rank": 1}));
}

#[test]
fn soft_delete_keeps_the_row_but_hides_it() {
    let (_tmp, docs) = setup();
    let ctx = Deadline::default();
    let key = create(&docs, "stu_ana", "Robotics Cup");
    docs.soft_delete(&ctx, &key).unwrap();

    assert!(docs.get_by_id(&ctx, &key).unwrap().is_none());
    let tomb = docs.get_including_deleted(&ctx, &key).unwrap().unwrap();
    assert!(tomb.deleted_at.is_some());
    assert_eq!(tomb.content.title, "Robotics Cup");

    let first_tombstone = tomb.deleted_at;
    docs.soft_delete(&ctx, &key).unwrap();
    let again = docs.get_including_deleted(&ctx, &key).unwrap().unwrap();
    assert_eq!(again.deleted_at, first_tombstone);
}

#[test]
fn tombstoned_documents_reject_updates_and_attachments() {
    let (_tmp, docs) = setup();
    let ctx = Deadline::default();
    let key = create(&docs, "stu_ana", "Robotics Cup");
    docs.soft_delete(&ctx, &key).unwrap();

    let fields = json!({"title": "Too late"});
    let patch = DocumentPatch::from_fields(fields.as_object().unwrap()).unwrap();
    assert!(matches!(
        docs.update(&ctx, &key, &patch),
        Err(AccoladeError::NotFound(_))
    ));
    assert!(matches!(
        docs.add_attachment(&ctx, &key, &certificate()),
        Err(AccoladeError::NotFound(_))
    ));
    assert!(matches!(
        docs.soft_delete(&ctx, &DocumentKey::generate()),
        Err(AccoladeError::NotFound(_))
    ));
}

#[test]
fn attachments_append_in_order() {
    let (_tmp, docs) = setup();
    let ctx = Deadline::default();
    let key = create(&docs, "stu_ana", "Robotics Cup");
    let mut photo = certificate();
    photo.file_name = "podium.jpg".into();
    photo.mime_type = "image/jpeg".into();

    docs.add_attachment(&ctx, &key, &certificate()).unwrap();
    docs.add_attachment(&ctx, &key, &photo).unwrap();

    let doc = docs.get_by_id(&ctx, &key).unwrap().unwrap();
    assert_eq!(doc.content.attachments, vec![certificate(), photo]);
}

#[test]
fn list_by_student_pages_live_documents_newest_first() {
    let (_tmp, docs) = setup();
    let ctx = Deadline::default();
    let keys: Vec<DocumentKey> = (0..25)
        .map(|i| create(&docs, "stu_ana", &format!("Entry {}", i)))
        .collect();
    create(&docs, "stu_ben", "Other");
    docs.soft_delete(&ctx, &keys[24]).unwrap();

    let page = docs.list_by_student(&ctx, "stu_ana", 0, 0).unwrap();
    assert_eq!(page.len(), 20);
    assert_eq!(page[0].key, keys[23]);

    let rest = docs.list_by_student(&ctx, "stu_ana", 10, 20).unwrap();
    assert_eq!(rest.len(), 4);
    assert_eq!(rest.last().unwrap().key, keys[0]);
    assert!(rest.iter().all(|d| d.student_id == "stu_ana"));
}
