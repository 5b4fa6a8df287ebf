//! Upload-to-roster reconciliation.
//!
//! The three files are parsed and validated on their own threads, the two
//! secondary indexes are built side by side, and the merge starts only once
//! both indexes exist. Nothing is shared between stages except the finished,
//! read-only indexes.

use std::any::Any;
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::identity::{self, KeyField};
use crate::merge;
use crate::models::{ErrorCollection, ProcessingResult, RawRow, Source, SourceSummary, ValidationError};
use crate::parser;
use crate::schema::ColumnMap;
use crate::validate::{self, Validated};

/// The three uploaded files, exactly as received.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub enrollments: Vec<u8>,
    pub grades: Vec<u8>,
    pub progress: Vec<u8>,
}

struct SourceStage<T> {
    headers: Arc<[String]>,
    total: usize,
    key_field: KeyField,
    validated: Validated<T>,
}

fn run_stage<T>(
    bytes: &[u8],
    source: Source,
    config: &PipelineConfig,
    validate: fn(&[RawRow], &ColumnMap, &PipelineConfig) -> Validated<T>,
) -> Result<SourceStage<T>, PipelineError> {
    let file = parser::parse(bytes, source, config.delimiter_byte())?;
    let columns = ColumnMap::resolve(source, &file.headers)?;
    let validated = validate(&file.rows, &columns, config);
    info!(
        %source,
        rows = file.rows.len(),
        accepted = validated.accepted.len(),
        rejected = validated.rejected.len(),
        delimiter = %char::from(file.delimiter),
        "validated"
    );

    Ok(SourceStage {
        headers: file.headers,
        total: file.rows.len(),
        key_field: columns.key_field(),
        validated,
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn join<T>(handle: ScopedJoinHandle<'_, T>, file: Source, stage: &'static str) -> Result<T, PipelineError> {
    handle.join().map_err(|payload| {
        let message = panic_message(payload);
        warn!(source = %file, stage, %message, "stage panicked");
        PipelineError::Internal { file, stage, message }
    })
}

fn collect_errors(
    source: Source,
    headers: Arc<[String]>,
    mut errors: Vec<ValidationError>,
) -> ErrorCollection {
    errors.sort_by_key(|error| error.row.line);
    ErrorCollection {
        source,
        headers,
        errors,
    }
}

pub fn process(upload: &UploadRequest, config: &PipelineConfig) -> Result<ProcessingResult, PipelineError> {
    let (enrollments, grades, progress) = thread::scope(|scope| {
        let enrollments = scope.spawn(|| {
            run_stage(&upload.enrollments, Source::Enrollments, config, validate::validate_enrollments)
        });
        let grades = scope.spawn(|| run_stage(&upload.grades, Source::Grades, config, validate::validate_grades));
        let progress =
            scope.spawn(|| run_stage(&upload.progress, Source::Progress, config, validate::validate_progress));

        let enrollments = join(enrollments, Source::Enrollments, "validating");
        let grades = join(grades, Source::Grades, "validating");
        let progress = join(progress, Source::Progress, "validating");
        Ok::<_, PipelineError>((enrollments??, grades??, progress??))
    })?;

    let progress_key = progress.key_field;
    let (grade_build, progress_build) = thread::scope(|scope| {
        let grade_accepted = grades.validated.accepted;
        let progress_accepted = progress.validated.accepted;
        let grade_index = scope.spawn(move || identity::build_index(grade_accepted, KeyField::Email));
        let progress_index = scope.spawn(move || identity::build_index(progress_accepted, progress_key));

        let grade_build = join(grade_index, Source::Grades, "indexing");
        let progress_build = join(progress_index, Source::Progress, "indexing");
        Ok::<_, PipelineError>((grade_build?, progress_build?))
    })?;

    let (unique_enrollments, duplicate_enrollments) =
        identity::dedupe_enrollments(enrollments.validated.accepted);
    let valid_students = merge::merge_students(
        &unique_enrollments,
        &grade_build.index,
        &progress_build.index,
        config.passing_grade,
    );
    info!(
        students = valid_students.len(),
        grade_keys = grade_build.index.len(),
        progress_keys = progress_build.index.len(),
        progress_key = progress_key.column(),
        "merged"
    );

    let mut enrollment_errors = enrollments.validated.rejected;
    enrollment_errors.extend(duplicate_enrollments);
    let mut grade_errors = grades.validated.rejected;
    grade_errors.extend(grade_build.rejected);
    grade_errors.extend(merge::unjoined_rows(&unique_enrollments, grade_build.index));
    let mut progress_errors = progress.validated.rejected;
    progress_errors.extend(progress_build.rejected);
    progress_errors.extend(merge::unjoined_rows(&unique_enrollments, progress_build.index));

    let summaries = vec![
        SourceSummary {
            source: Source::Enrollments,
            total: enrollments.total,
            accepted: valid_students.len(),
            rejected: enrollment_errors.len(),
        },
        SourceSummary {
            source: Source::Grades,
            total: grades.total,
            accepted: grades.total - grade_errors.len(),
            rejected: grade_errors.len(),
        },
        SourceSummary {
            source: Source::Progress,
            total: progress.total,
            accepted: progress.total - progress_errors.len(),
            rejected: progress_errors.len(),
        },
    ];

    Ok(ProcessingResult {
        valid_students,
        enrollment_errors: collect_errors(Source::Enrollments, enrollments.headers, enrollment_errors),
        grade_errors: collect_errors(Source::Grades, grades.headers, grade_errors),
        progress_errors: collect_errors(Source::Progress, progress.headers, progress_errors),
        summaries,
    })
}
