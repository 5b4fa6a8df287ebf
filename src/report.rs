use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{ErrorReason, ProcessingResult, Situation, Source};
use crate::store::ProcessingRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonSummary {
    pub source: Source,
    pub reason: ErrorReason,
    pub count: usize,
}

pub fn summarize_by_reason(result: &ProcessingResult) -> Vec<ReasonSummary> {
    let mut map: HashMap<(Source, ErrorReason), usize> = HashMap::new();

    for collection in result.error_collections() {
        for error in &collection.errors {
            *map.entry((collection.source, error.reason)).or_insert(0) += 1;
        }
    }

    let mut summaries: Vec<ReasonSummary> = map
        .into_iter()
        .map(|((source, reason), count)| ReasonSummary {
            source,
            reason,
            count,
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.source.label().cmp(b.source.label()))
            .then_with(|| a.reason.cmp(&b.reason))
    });
    summaries
}

pub fn situation_counts(result: &ProcessingResult) -> [(Situation, usize); 3] {
    let mut counts = [
        (Situation::Approved, 0),
        (Situation::Failed, 0),
        (Situation::NotEvaluated, 0),
    ];
    for student in &result.valid_students {
        if let Some(entry) = counts.iter_mut().find(|(situation, _)| *situation == student.situation) {
            entry.1 += 1;
        }
    }
    counts
}

pub fn build_report(request: &ProcessingRequest) -> String {
    let result = &request.result;
    let reasons = summarize_by_reason(result);

    let mut output = String::new();

    let _ = writeln!(output, "# Roster Reconciliation Report");
    let _ = writeln!(
        output,
        "Request {} processed at {}",
        request.id,
        request.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Sources");

    for summary in &result.summaries {
        let _ = writeln!(
            output,
            "- {}: {} rows, {} accepted, {} rejected",
            summary.source, summary.total, summary.accepted, summary.rejected
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Situation Mix");

    if result.valid_students.is_empty() {
        let _ = writeln!(output, "No valid students in this upload.");
    } else {
        for (situation, count) in situation_counts(result) {
            let _ = writeln!(output, "- {}: {}", situation, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Rejection Reasons");

    if reasons.is_empty() {
        let _ = writeln!(output, "No rows were rejected.");
    } else {
        for summary in &reasons {
            let _ = writeln!(
                output,
                "- {} / {}: {} rows",
                summary.source, summary.reason, summary.count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## First Rejections");

    let mut shown = 0;
    for collection in result.error_collections() {
        for error in collection.errors.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} line {}: {} ({})",
                collection.source, error.row.line, error.reason, error.detail
            );
            shown += 1;
        }
    }
    if shown == 0 {
        let _ = writeln!(output, "Nothing to show.");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::{self, UploadRequest};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn request(enrollments: &str, grades: &str) -> ProcessingRequest {
        let upload = UploadRequest {
            enrollments: enrollments.as_bytes().to_vec(),
            grades: grades.as_bytes().to_vec(),
            progress: b"email;progress\n".to_vec(),
        };
        ProcessingRequest {
            id: Uuid::nil(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap(),
            result: pipeline::process(&upload, &PipelineConfig::default()).unwrap(),
        }
    }

    #[test]
    fn reasons_are_ranked_by_count() {
        let request = request(
            "email;full_name\na@x.com;Ana\nbad;Bia\nworse;Caio\n;Duda\n",
            "email;grade\na@x.com;x\n",
        );
        let reasons = summarize_by_reason(&request.result);

        assert_eq!(
            reasons,
            vec![
                ReasonSummary {
                    source: Source::Enrollments,
                    reason: ErrorReason::InvalidEmail,
                    count: 2,
                },
                ReasonSummary {
                    source: Source::Enrollments,
                    reason: ErrorReason::MissingRequiredField,
                    count: 1,
                },
                ReasonSummary {
                    source: Source::Grades,
                    reason: ErrorReason::UnparsableNumber,
                    count: 1,
                },
            ]
        );
    }

    #[test]
    fn counts_situations() {
        let request = request(
            "email;full_name\na@x.com;Ana\nb@x.com;Bia\nc@x.com;Caio\n",
            "email;grade\na@x.com;9\nb@x.com;2\n",
        );
        assert_eq!(
            situation_counts(&request.result),
            [
                (Situation::Approved, 1),
                (Situation::Failed, 1),
                (Situation::NotEvaluated, 1),
            ]
        );
    }

    #[test]
    fn report_lists_sources_and_rejections() {
        let request = request("email;full_name\na@x.com;Ana\nbad;Bia\n", "email;grade\n");
        let report = build_report(&request);

        assert!(report.starts_with("# Roster Reconciliation Report\n"));
        assert!(report.contains("processed at 2026-03-02 09:30:00 UTC"));
        assert!(report.contains("- enrollments: 2 rows, 1 accepted, 1 rejected"));
        assert!(report.contains("- not_evaluated: 1"));
        assert!(report.contains("- enrollments / InvalidEmail: 1 rows"));
        assert!(report.contains("- enrollments line 3: InvalidEmail"));
    }

    #[test]
    fn clean_upload_says_so() {
        let report = build_report(&request("email;full_name\na@x.com;Ana\n", "email;grade\n"));
        assert!(report.contains("No rows were rejected."));
        assert!(report.contains("Nothing to show."));
    }
}
