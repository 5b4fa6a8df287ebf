use std::collections::HashSet;

use tracing::{debug, warn};

use crate::identity::{self, KeyField, SecondaryIndex};
use crate::models::{
    Accepted, EnrollmentRecord, GradeRecord, ProgressRecord, Situation, StudentRecord, ValidationError,
};

pub fn situation_for(grade: Option<f64>, passing_grade: f64) -> Situation {
    match grade {
        Some(grade) if grade >= passing_grade => Situation::Approved,
        Some(_) => Situation::Failed,
        None => Situation::NotEvaluated,
    }
}

fn join_key(record: &EnrollmentRecord, key_field: KeyField) -> &str {
    match key_field {
        KeyField::Email => &record.email,
        KeyField::FullName => &record.full_name,
    }
}

/// Rows of a secondary source that no enrollment joins to.
pub fn unjoined_rows<T>(
    enrollments: &[Accepted<EnrollmentRecord>],
    index: SecondaryIndex<T>,
) -> Vec<ValidationError> {
    let key_field = index.key_field();
    let joined: HashSet<String> = enrollments
        .iter()
        .map(|entry| identity::normalize_key(join_key(&entry.record, key_field)))
        .collect();
    index.into_unjoined(&joined)
}

/// One student per enrollment, in enrollment order. Unmatched grade or
/// progress leaves the field empty; the student is still emitted.
pub fn merge_students(
    enrollments: &[Accepted<EnrollmentRecord>],
    grades: &SecondaryIndex<GradeRecord>,
    progress: &SecondaryIndex<ProgressRecord>,
    passing_grade: f64,
) -> Vec<StudentRecord> {
    let mut students = Vec::with_capacity(enrollments.len());

    for Accepted { record, row } in enrollments {
        let grade = grades.get(join_key(record, grades.key_field()));
        let completion = progress.get(join_key(record, progress.key_field()));

        if grade.is_none() || completion.is_none() {
            debug!(
                line = row.line,
                email = %record.email,
                grade_matched = grade.is_some(),
                progress_matched = completion.is_some(),
                "partial match"
            );
        }

        let grade_value = grade.map(|grade| grade.grade);
        let situation = situation_for(grade_value, passing_grade);

        if let Some(passed) = grade.and_then(|grade| grade.passed) {
            if passed != (situation == Situation::Approved) {
                warn!(
                    line = row.line,
                    email = %record.email,
                    passed,
                    %situation,
                    "grade file pass indicator disagrees with derived situation"
                );
            }
        }

        students.push(StudentRecord {
            identity: record.identity().to_string(),
            full_name: record.full_name.clone(),
            email: record.email.clone(),
            birth_date: record.birth_date,
            gender: record.gender.clone(),
            profession: record.profession.clone(),
            product: record.product.clone(),
            order_id: record.order_id.clone(),
            city: record.city.clone(),
            state: record.state.clone(),
            affiliation: record.affiliation.clone(),
            completed: record.completed,
            completed_on: record.completed_on,
            grade: grade_value,
            progress: completion.map(|entry| entry.progress),
            specialization: completion
                .and_then(|entry| entry.track.clone())
                .or_else(|| record.specialization.clone()),
            situation,
        });
    }

    students
}
