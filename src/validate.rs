use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::identity::KeyField;
use crate::models::{
    Accepted, EnrollmentRecord, ErrorReason, GradeRecord, ProgressRecord, RawRow, Source,
    ValidationError,
};
use crate::schema::ColumnMap;

const PERCENT_MAX: f64 = 100.0;

#[derive(Debug)]
pub struct Validated<T> {
    pub accepted: Vec<Accepted<T>>,
    pub rejected: Vec<ValidationError>,
}

#[derive(Debug, Clone, PartialEq)]
struct Violation {
    reason: ErrorReason,
    field: Option<&'static str>,
    detail: String,
}

impl Violation {
    fn new(reason: ErrorReason, field: &'static str, detail: String) -> Self {
        Self {
            reason,
            field: Some(field),
            detail,
        }
    }
}

/// Typed access to one row's cells. Each accessor validates a single column.
struct Fields<'a> {
    row: &'a RawRow,
    columns: &'a ColumnMap,
    config: &'a PipelineConfig,
}

impl<'a> Fields<'a> {
    fn raw(&self, name: &'static str) -> Option<&'a str> {
        self.columns.value(self.row, name)
    }

    fn text(&self, name: &'static str) -> Option<String> {
        self.raw(name).map(str::to_string)
    }

    fn required(&self, name: &'static str) -> Result<&'a str, Violation> {
        self.raw(name).ok_or_else(|| {
            Violation::new(
                ErrorReason::MissingRequiredField,
                name,
                format!("{name} is required"),
            )
        })
    }

    fn identifier(&self, name: &'static str) -> Option<String> {
        self.raw(name).map(normalize_identifier)
    }

    fn email(&self, name: &'static str, required: bool) -> Result<Option<String>, Violation> {
        let value = if required {
            Some(self.required(name)?)
        } else {
            self.raw(name)
        };
        match value {
            Some(value) if is_valid_email(value) => Ok(Some(value.to_lowercase())),
            Some(value) => Err(Violation::new(
                ErrorReason::InvalidEmail,
                name,
                format!("'{value}' is not an email address"),
            )),
            None => Ok(None),
        }
    }

    fn date(&self, name: &'static str) -> Result<Option<NaiveDate>, Violation> {
        match self.raw(name) {
            Some(value) => parse_date(value, &self.config.date_formats)
                .map(Some)
                .ok_or_else(|| malformed_date(name, value)),
            None => Ok(None),
        }
    }

    fn number(&self, name: &'static str, max: f64, required: bool) -> Result<Option<f64>, Violation> {
        let value = if required {
            Some(self.required(name)?)
        } else {
            self.raw(name)
        };
        let Some(value) = value else {
            return Ok(None);
        };
        let number = parse_number(value).ok_or_else(|| {
            Violation::new(
                ErrorReason::UnparsableNumber,
                name,
                format!("'{value}' is not a number"),
            )
        })?;
        if !(0.0..=max).contains(&number) {
            return Err(Violation::new(
                ErrorReason::OtherSchemaViolation,
                name,
                format!("{number} is outside 0..={max}"),
            ));
        }
        Ok(Some(number))
    }

    fn flag(&self, name: &'static str) -> Result<Option<bool>, Violation> {
        match self.raw(name) {
            Some(value) => parse_flag(value).map(Some).ok_or_else(|| {
                Violation::new(
                    ErrorReason::OtherSchemaViolation,
                    name,
                    format!("'{value}' is not a yes/no value"),
                )
            }),
            None => Ok(None),
        }
    }

    /// A completion cell is either a yes/no token or the completion date.
    fn completion(&self, name: &'static str) -> Result<(bool, Option<NaiveDate>), Violation> {
        let Some(value) = self.raw(name) else {
            return Ok((false, None));
        };
        if let Some(flag) = parse_flag(value) {
            return Ok((flag, None));
        }
        parse_date(value, &self.config.date_formats)
            .map(|date| (true, Some(date)))
            .ok_or_else(|| malformed_date(name, value))
    }
}

fn malformed_date(name: &'static str, value: &str) -> Violation {
    Violation::new(
        ErrorReason::MalformedDate,
        name,
        format!("'{value}' does not match any accepted date format"),
    )
}

fn validate_rows<T>(
    rows: &[RawRow],
    columns: &ColumnMap,
    config: &PipelineConfig,
    read: impl Fn(&Fields<'_>) -> Result<T, Violation>,
) -> Validated<T> {
    let mut accepted = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();

    for row in rows {
        // Short rows were padded by the parser; only extra fields are an error.
        let outcome = if !row.has_extra_fields() {
            read(&Fields { row, columns, config })
        } else {
            Err(Violation {
                reason: ErrorReason::OtherSchemaViolation,
                field: None,
                detail: format!(
                    "expected at most {} fields, found {}",
                    row.headers.len(),
                    row.field_count
                ),
            })
        };

        match outcome {
            Ok(record) => accepted.push(Accepted {
                record,
                row: row.clone(),
            }),
            Err(violation) => {
                debug!(
                    source = %row.source,
                    line = row.line,
                    reason = %violation.reason,
                    detail = %violation.detail,
                    "row rejected"
                );
                rejected.push(ValidationError {
                    reason: violation.reason,
                    field: violation.field,
                    detail: violation.detail,
                    row: row.clone(),
                });
            }
        }
    }

    Validated { accepted, rejected }
}

pub fn validate_enrollments(
    rows: &[RawRow],
    columns: &ColumnMap,
    config: &PipelineConfig,
) -> Validated<EnrollmentRecord> {
    debug_assert_eq!(columns.source(), Source::Enrollments);
    validate_rows(rows, columns, config, |fields| {
        let identifier = fields.identifier("identifier");
        let order_id = fields.text("order_id");
        let product = fields.text("product");
        let full_name = fields.required("full_name")?.to_string();
        let birth_date = fields.date("birth_date")?;
        let gender = fields.text("gender");
        let email = fields.email("email", true)?.unwrap_or_default();
        let profession = fields.text("profession");
        let specialization = fields.text("specialization");
        let affiliation = fields.text("affiliation");
        let city = fields.text("city");
        let state = fields.text("state");
        let (mut completed, mut completed_on) = fields.completion("completed")?;
        if let Some(date) = fields.date("completed_on")? {
            completed = true;
            completed_on = Some(date);
        }

        Ok(EnrollmentRecord {
            identifier,
            order_id,
            product,
            full_name,
            birth_date,
            gender,
            email,
            profession,
            specialization,
            affiliation,
            city,
            state,
            completed,
            completed_on,
        })
    })
}

pub fn validate_grades(
    rows: &[RawRow],
    columns: &ColumnMap,
    config: &PipelineConfig,
) -> Validated<GradeRecord> {
    debug_assert_eq!(columns.source(), Source::Grades);
    validate_rows(rows, columns, config, |fields| {
        let first_name = fields.text("first_name");
        let last_name = fields.text("last_name");
        let email = fields.email("email", true)?.unwrap_or_default();
        let grade = fields
            .number("grade", fields.config.grade_scale, true)?
            .unwrap_or_default();
        let passed = fields.flag("passed")?;

        Ok(GradeRecord {
            first_name,
            last_name,
            email,
            grade,
            passed,
        })
    })
}

pub fn validate_progress(
    rows: &[RawRow],
    columns: &ColumnMap,
    config: &PipelineConfig,
) -> Validated<ProgressRecord> {
    debug_assert_eq!(columns.source(), Source::Progress);
    let key_field = columns.key_field();
    validate_rows(rows, columns, config, |fields| {
        let email = fields.email("email", key_field == KeyField::Email)?;
        let full_name = match key_field {
            KeyField::FullName => Some(fields.required("full_name")?.to_string()),
            KeyField::Email => fields.text("full_name"),
        };
        let progress = fields.number("progress", PERCENT_MAX, true)?.unwrap_or_default();
        let track = fields.text("track");

        Ok(ProgressRecord {
            email,
            full_name,
            progress,
            track,
        })
    })
}

/// Accepts a decimal comma and a trailing percent sign. Non-finite values are
/// not numbers.
pub fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    let value = value.strip_suffix('%').unwrap_or(value).trim_end();
    let normalized = if value.contains('.') {
        value.to_string()
    } else {
        value.replacen(',', ".", 1)
    };
    normalized.parse::<f64>().ok().filter(|number| number.is_finite())
}

pub fn parse_date(value: &str, formats: &[String]) -> Option<NaiveDate> {
    formats.iter().find_map(|format| {
        NaiveDate::parse_from_str(value, format)
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(value, format)
                    .ok()
                    .map(|datetime| datetime.date())
            })
    })
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" | "x" | "sim" | "s" | "passed" | "pass" | "approved"
        | "aprovado" => Some(true),
        "no" | "n" | "false" | "0" | "não" | "nao" | "failed" | "fail" | "reprovado" => {
            Some(false)
        }
        _ => None,
    }
}

pub fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// Spreadsheet round trips turn `123` into `123.0`; strip the zero fraction.
pub fn normalize_identifier(value: &str) -> String {
    match value.split_once('.') {
        Some((integral, fraction))
            if !integral.is_empty()
                && integral.chars().all(|c| c.is_ascii_digit())
                && !fraction.is_empty()
                && fraction.chars().all(|c| c == '0') =>
        {
            integral.to_string()
        }
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn run_enrollments(csv: &str) -> Validated<EnrollmentRecord> {
        let file = parser::parse(csv.as_bytes(), Source::Enrollments, None).unwrap();
        let columns = ColumnMap::resolve(Source::Enrollments, &file.headers).unwrap();
        validate_enrollments(&file.rows, &columns, &PipelineConfig::default())
    }

    fn run_grades(csv: &str) -> Validated<GradeRecord> {
        let file = parser::parse(csv.as_bytes(), Source::Grades, None).unwrap();
        let columns = ColumnMap::resolve(Source::Grades, &file.headers).unwrap();
        validate_grades(&file.rows, &columns, &PipelineConfig::default())
    }

    fn run_progress(csv: &str) -> Validated<ProgressRecord> {
        let file = parser::parse(csv.as_bytes(), Source::Progress, None).unwrap();
        let columns = ColumnMap::resolve(Source::Progress, &file.headers).unwrap();
        validate_progress(&file.rows, &columns, &PipelineConfig::default())
    }

    #[test]
    fn accepts_complete_enrollment_row() {
        let result = run_enrollments(
            "identificador;nome_inscricao;email_inscricao;nascimento;concluido;cidade\n\
             1042.0;Ana Souza;Ana@X.com;05/03/1990;12/11/2025;Recife\n",
        );

        assert!(result.rejected.is_empty());
        let record = &result.accepted[0].record;
        assert_eq!(record.identifier.as_deref(), Some("1042"));
        assert_eq!(record.full_name, "Ana Souza");
        assert_eq!(record.email, "ana@x.com");
        assert_eq!(record.birth_date, NaiveDate::from_ymd_opt(1990, 3, 5));
        assert!(record.completed);
        assert_eq!(record.completed_on, NaiveDate::from_ymd_opt(2025, 11, 12));
        assert_eq!(record.city.as_deref(), Some("Recife"));
        assert_eq!(result.accepted[0].row.line, 2);
    }

    #[test]
    fn first_violation_in_declaration_order_wins() {
        // birth_date is declared before email, so the bad date is reported.
        let result = run_enrollments("full_name;email;birth_date\nAna;not-an-email;31/02/1990\n");

        assert_eq!(result.rejected.len(), 1);
        let error = &result.rejected[0];
        assert_eq!(error.reason, ErrorReason::MalformedDate);
        assert_eq!(error.field, Some("birth_date"));
        assert_eq!(error.row.cell(1), Some("not-an-email"));
    }

    #[test]
    fn classifies_enrollment_failures() {
        let result = run_enrollments(
            "full_name;email;completed\n\
             ;a@x.com;\n\
             Bia;b@x;\n\
             Caio;c@x.com;maybe\n\
             Duda;d@x.com;sim\n",
        );

        let reasons: Vec<(u64, ErrorReason, Option<&str>)> = result
            .rejected
            .iter()
            .map(|e| (e.row.line, e.reason, e.field))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (2, ErrorReason::MissingRequiredField, Some("full_name")),
                (3, ErrorReason::InvalidEmail, Some("email")),
                (4, ErrorReason::MalformedDate, Some("completed")),
            ]
        );
        assert_eq!(result.accepted.len(), 1);
        assert!(result.accepted[0].record.completed);
    }

    #[test]
    fn extra_fields_are_a_schema_violation() {
        let result = run_enrollments("full_name;email\nAna;a@x.com;extra\n");
        assert_eq!(result.rejected[0].reason, ErrorReason::OtherSchemaViolation);
        assert_eq!(result.rejected[0].field, None);
    }

    #[test]
    fn short_rows_read_missing_trailing_fields_as_empty() {
        let result = run_enrollments("full_name;email;city;state\nAna;a@x.com\nBia\n");

        assert_eq!(result.accepted.len(), 1);
        let record = &result.accepted[0].record;
        assert_eq!(record.email, "a@x.com");
        assert_eq!(record.city, None);
        assert_eq!(record.state, None);

        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].reason, ErrorReason::MissingRequiredField);
        assert_eq!(result.rejected[0].field, Some("email"));
    }

    #[test]
    fn grade_rules() {
        let result = run_grades(
            "email;nota;aprovado\n\
             a@x.com;8,5;sim\n\
             b@x.com;;\n\
             c@x.com;oito;\n\
             d@x.com;11;\n\
             e@x.com;-1;\n\
             f@x.com;7;talvez\n",
        );

        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.accepted[0].record.grade, 8.5);
        assert_eq!(result.accepted[0].record.passed, Some(true));

        let reasons: Vec<ErrorReason> = result.rejected.iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![
                ErrorReason::MissingRequiredField,
                ErrorReason::UnparsableNumber,
                ErrorReason::OtherSchemaViolation,
                ErrorReason::OtherSchemaViolation,
                ErrorReason::OtherSchemaViolation,
            ]
        );
    }

    #[test]
    fn progress_keyed_by_name_requires_name() {
        let result = run_progress("nome_progresso;progresso\nAna Souza;85%\n;40\n");
        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.accepted[0].record.progress, 85.0);
        assert_eq!(result.accepted[0].record.email, None);
        assert_eq!(result.rejected[0].reason, ErrorReason::MissingRequiredField);
        assert_eq!(result.rejected[0].field, Some("full_name"));
    }

    #[test]
    fn progress_above_hundred_is_rejected() {
        let result = run_progress("email,progress,track\na@x.com,100,Data\nb@x.com,100.5,\n");
        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.accepted[0].record.track.as_deref(), Some("Data"));
        assert_eq!(result.rejected[0].reason, ErrorReason::OtherSchemaViolation);
    }

    #[test]
    fn number_parsing() {
        assert_eq!(parse_number("7"), Some(7.0));
        assert_eq!(parse_number("7,25"), Some(7.25));
        assert_eq!(parse_number(" 42 % "), Some(42.0));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("seven"), None);
    }

    #[test]
    fn date_parsing_tries_each_format() {
        let formats = PipelineConfig::default().date_formats;
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5);
        assert_eq!(parse_date("05/01/2024", &formats), expected);
        assert_eq!(parse_date("2024-01-05", &formats), expected);
        assert_eq!(parse_date("2024-01-05 13:45:00", &formats), expected);
        assert_eq!(parse_date("January 5th", &formats), None);
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("ana.souza@escola.edu.br"));
        assert!(!is_valid_email("ana@"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("ana@x"));
        assert!(!is_valid_email("ana@x..com"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(!is_valid_email("a@b@x.com"));
    }

    #[test]
    fn identifiers_lose_spreadsheet_fraction() {
        assert_eq!(normalize_identifier("123.0"), "123");
        assert_eq!(normalize_identifier("007"), "007");
        assert_eq!(normalize_identifier("12.5"), "12.5");
        assert_eq!(normalize_identifier("A-12.00"), "A-12.00");
    }
}
