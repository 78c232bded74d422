//! Aggregate statistics over reference rows.

use crate::plugins::references::{AchievementReference, Status};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const TOP_STUDENTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentCount {
    pub student_id: String,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub by_status: BTreeMap<Status, usize>,
    pub top_students: Vec<StudentCount>,
    /// verified / total, 0.0 when there is nothing to count.
    pub verification_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentSummary {
    pub student_id: String,
    pub total: usize,
    pub by_status: BTreeMap<Status, usize>,
    pub draft: usize,
    pub submitted: usize,
    pub verified: usize,
    pub rejected: usize,
    /// verified / total for this student, 0.0 when they have no references.
    pub verification_rate: f64,
}

fn count_by_status<'a>(refs: impl Iterator<Item = &'a AchievementReference>) -> BTreeMap<Status, usize> {
    let mut counts: BTreeMap<Status, usize> = Status::ALL.into_iter().map(|s| (s, 0)).collect();
    for r in refs {
        *counts.entry(r.status).or_default() += 1;
    }
    counts
}

fn rate(verified: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        verified as f64 / total as f64
    }
}

pub fn summarize(refs: &[AchievementReference]) -> Summary {
    let by_status = count_by_status(refs.iter());

    let mut per_student: HashMap<&str, usize> = HashMap::new();
    for r in refs {
        *per_student.entry(r.student_id.as_str()).or_default() += 1;
    }
    let mut top_students: Vec<StudentCount> = per_student
        .into_iter()
        .map(|(student_id, total)| StudentCount {
            student_id: student_id.to_string(),
            total,
        })
        .collect();
    top_students.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.student_id.cmp(&b.student_id)));
    top_students.truncate(TOP_STUDENTS);

    let verification_rate = rate(by_status.get(&Status::Verified).copied().unwrap_or(0), refs.len());

    Summary {
        total: refs.len(),
        by_status,
        top_students,
        verification_rate,
    }
}

pub fn summarize_student(student_id: &str, refs: &[AchievementReference]) -> StudentSummary {
    let owned: Vec<&AchievementReference> = refs.iter().filter(|r| r.student_id == student_id).collect();
    let by_status = count_by_status(owned.iter().copied());
    let of = |s: Status| by_status.get(&s).copied().unwrap_or(0);
    StudentSummary {
        student_id: student_id.to_string(),
        total: owned.len(),
        draft: of(Status::Draft),
        submitted: of(Status::Submitted),
        verified: of(Status::Verified),
        rejected: of(Status::Rejected),
        verification_rate: rate(of(Status::Verified), owned.len()),
        by_status,
    }
}
