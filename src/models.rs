use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Enrollments,
    Grades,
    Progress,
}

impl Source {
    pub fn label(self) -> &'static str {
        match self {
            Source::Enrollments => "enrollments",
            Source::Grades => "grades",
            Source::Progress => "progress",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One data line of an uploaded file, exactly as it was read.
///
/// `cells` is aligned with `headers`; a `None` cell was empty after trimming.
/// Lines shorter than the header are padded with `None`, longer lines keep
/// their extra values past the end of `headers`. `field_count` is the number
/// of fields the line actually had.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub source: Source,
    pub line: u64,
    pub headers: Arc<[String]>,
    pub cells: Vec<Option<String>>,
    pub field_count: usize,
}

impl RawRow {
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).and_then(|value| value.as_deref())
    }

    pub fn has_extra_fields(&self) -> bool {
        self.field_count > self.headers.len()
    }
}

struct RowValues<'a>(&'a RawRow);

impl Serialize for RowValues<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let row = self.0;
        let mut map = serializer.serialize_map(Some(row.cells.len()))?;
        for (index, value) in row.cells.iter().enumerate() {
            match row.headers.get(index) {
                Some(header) => map.serialize_entry(header, value)?,
                None => map.serialize_entry(&format!("extra_{}", index + 1 - row.headers.len()), value)?,
            }
        }
        map.end()
    }
}

impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RawRow", 3)?;
        state.serialize_field("source", &self.source)?;
        state.serialize_field("line", &self.line)?;
        state.serialize_field("values", &RowValues(self))?;
        state.end()
    }
}

/// A validated record together with the row it was read from.
#[derive(Debug, Clone)]
pub struct Accepted<T> {
    pub record: T,
    pub row: RawRow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRecord {
    pub identifier: Option<String>,
    pub order_id: Option<String>,
    pub product: Option<String>,
    pub full_name: String,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub email: String,
    pub profession: Option<String>,
    pub specialization: Option<String>,
    pub affiliation: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub completed: bool,
    pub completed_on: Option<NaiveDate>,
}

impl EnrollmentRecord {
    pub fn identity(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub grade: f64,
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub progress: f64,
    pub track: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Situation {
    Approved,
    Failed,
    NotEvaluated,
}

impl Situation {
    pub fn as_str(self) -> &'static str {
        match self {
            Situation::Approved => "approved",
            Situation::Failed => "failed",
            Situation::NotEvaluated => "not_evaluated",
        }
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Situation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "approved" | "aprovado" => Ok(Situation::Approved),
            "failed" | "reprovado" => Ok(Situation::Failed),
            "not_evaluated" | "não_avaliado" | "nao_avaliado" => Ok(Situation::NotEvaluated),
            other => Err(format!("unknown situation '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub identity: String,
    pub full_name: String,
    pub email: String,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub profession: Option<String>,
    pub product: Option<String>,
    pub order_id: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub affiliation: Option<String>,
    pub completed: bool,
    pub completed_on: Option<NaiveDate>,
    pub grade: Option<f64>,
    pub progress: Option<f64>,
    pub specialization: Option<String>,
    pub situation: Situation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorReason {
    MissingRequiredField,
    UnparsableNumber,
    DuplicateKey,
    MalformedDate,
    InvalidEmail,
    OtherSchemaViolation,
}

impl ErrorReason {
    pub fn label(self) -> &'static str {
        match self {
            ErrorReason::MissingRequiredField => "MissingRequiredField",
            ErrorReason::UnparsableNumber => "UnparsableNumber",
            ErrorReason::DuplicateKey => "DuplicateKey",
            ErrorReason::MalformedDate => "MalformedDate",
            ErrorReason::InvalidEmail => "InvalidEmail",
            ErrorReason::OtherSchemaViolation => "OtherSchemaViolation",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub reason: ErrorReason,
    pub field: Option<&'static str>,
    pub detail: String,
    pub row: RawRow,
}

/// Rejected rows of one source, plus that file's header so the rows can be
/// exported even when there are none.
#[derive(Debug, Clone)]
pub struct ErrorCollection {
    pub source: Source,
    pub headers: Arc<[String]>,
    pub errors: Vec<ValidationError>,
}

impl Serialize for ErrorCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.errors.serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub source: Source,
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub valid_students: Vec<StudentRecord>,
    pub enrollment_errors: ErrorCollection,
    pub grade_errors: ErrorCollection,
    pub progress_errors: ErrorCollection,
    pub summaries: Vec<SourceSummary>,
}

impl ProcessingResult {
    pub fn error_collections(&self) -> [&ErrorCollection; 3] {
        [&self.enrollment_errors, &self.grade_errors, &self.progress_errors]
    }

    pub fn total_rejected(&self) -> usize {
        self.error_collections()
            .iter()
            .map(|collection| collection.errors.len())
            .sum()
    }
}
