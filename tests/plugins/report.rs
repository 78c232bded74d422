use accolade::plugins::references::{AchievementReference, Status};
use accolade::plugins::report::{summarize, summarize_student};

fn reference(student: &str, status: Status) -> AchievementReference {
    let mut r = AchievementReference::new_draft(student, "01JAAAAAAAAAAAAAAAAAAAAAAA");
    r.status = status;
    r
}

#[test]
fn empty_input_has_zero_rate() {
    let summary = summarize(&[]);
    assert_eq!(summary.total, 0);
    assert_eq!(summary.verification_rate, 0.0);
    assert!(summary.top_students.is_empty());
    assert_eq!(summary.by_status.len(), 5);
    assert!(summary.by_status.values().all(|c| *c == 0));
}

#[test]
fn counts_statuses_and_rate() {
    let refs = vec![
        reference("stu_ana", Status::Verified),
        reference("stu_ana", Status::Verified),
        reference("stu_ana", Status::Rejected),
        reference("stu_ben", Status::Draft),
    ];
    let summary = summarize(&refs);
    assert_eq!(summary.total, 4);
    assert_eq!(summary.by_status[&Status::Verified], 2);
    assert_eq!(summary.by_status[&Status::Submitted], 0);
    assert_eq!(summary.verification_rate, 0.5);
}

#[test]
fn top_students_are_capped_at_five_with_ties_by_id() {
    let mut refs = Vec::new();
    for (student, n) in [
        ("stu_f", 1),
        ("stu_e", 2),
        ("stu_d", 2),
        ("stu_c", 3),
        ("stu_b", 1),
        ("stu_a", 1),
    ] {
        for _ in 0..n {
            refs.push(reference(student, Status::Submitted));
        }
    }
    let top: Vec<(String, usize)> = summarize(&refs)
        .top_students
        .into_iter()
        .map(|s| (s.student_id, s.total))
        .collect();
    assert_eq!(
        top,
        vec![
            ("stu_c".to_string(), 3),
            ("stu_d".to_string(), 2),
            ("stu_e".to_string(), 2),
            ("stu_a".to_string(), 1),
            ("stu_b".to_string(), 1),
        ]
    );
}

#[test]
fn student_summary_only_counts_that_student() {
    let refs = vec![
        reference("stu_ana", Status::Draft),
        reference("stu_ana", Status::Submitted),
        reference("stu_ana", Status::Verified),
        reference("stu_ana", Status::Deleted),
        reference("stu_ben", Status::Rejected),
    ];
    let s = summarize_student("stu_ana", &refs);
    assert_eq!(s.total, 4);
    assert_eq!((s.draft, s.submitted, s.verified, s.rejected), (1, 1, 1, 0));
    assert_eq!(s.by_status[&Status::Deleted], 1);
    assert_eq!(s.verification_rate, 0.25);

    let json = serde_json::to_value(&s).unwrap();
    assert_eq!(json["by_status"]["verified"], 1);
    assert_eq!(json["verification_rate"], 0.25);
}

#[test]
fn student_without_references_has_zero_rate() {
    let refs = vec![reference("stu_ben", Status::Verified)];
    let s = summarize_student("stu_ana", &refs);
    assert_eq!(s.total, 0);
    assert_eq!(s.verification_rate, 0.0);
}
