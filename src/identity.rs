use std::collections::{HashMap, HashSet};

use deunicode::deunicode;
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{
    Accepted, EnrollmentRecord, ErrorReason, GradeRecord, ProgressRecord, RawRow, ValidationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    Email,
    FullName,
}

impl KeyField {
    pub fn column(self) -> &'static str {
        match self {
            KeyField::Email => "email",
            KeyField::FullName => "full_name",
        }
    }
}

/// Join-key normalization. Both sides of every join go through this, so
/// "José  Araújo" and "jose araujo" are the same key.
pub fn normalize_key(raw: &str) -> String {
    deunicode(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub trait Keyed {
    fn key(&self, field: KeyField) -> Option<&str>;
}

impl Keyed for EnrollmentRecord {
    fn key(&self, field: KeyField) -> Option<&str> {
        match field {
            KeyField::Email => Some(&self.email),
            KeyField::FullName => Some(&self.full_name),
        }
    }
}

impl Keyed for GradeRecord {
    fn key(&self, field: KeyField) -> Option<&str> {
        match field {
            KeyField::Email => Some(&self.email),
            KeyField::FullName => None,
        }
    }
}

impl Keyed for ProgressRecord {
    fn key(&self, field: KeyField) -> Option<&str> {
        match field {
            KeyField::Email => self.email.as_deref(),
            KeyField::FullName => self.full_name.as_deref(),
        }
    }
}

/// Read-only lookup of a secondary source by normalized key.
///
/// Keys seen on more than one row are ambiguous and never resolve. Each entry
/// keeps the row it came from so rows nothing joined to can be reported.
#[derive(Debug, Clone)]
pub struct SecondaryIndex<T> {
    key_field: KeyField,
    entries: HashMap<String, (T, RawRow)>,
    ambiguous: HashSet<String>,
}

impl<T> SecondaryIndex<T> {
    pub fn key_field(&self) -> KeyField {
        self.key_field
    }

    pub fn get(&self, raw_key: &str) -> Option<&T> {
        self.entries.get(&normalize_key(raw_key)).map(|(record, _)| record)
    }

    pub fn is_ambiguous(&self, raw_key: &str) -> bool {
        self.ambiguous.contains(&normalize_key(raw_key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ambiguous_count(&self) -> usize {
        self.ambiguous.len()
    }

    /// Consumes the index, rejecting every row whose normalized key is not in
    /// `joined`.
    pub fn into_unjoined(self, joined: &HashSet<String>) -> Vec<ValidationError> {
        let column = self.key_field.column();
        self.entries
            .into_iter()
            .filter(|(key, _)| !joined.contains(key))
            .map(|(key, (_, row))| {
                debug!(source = %row.source, line = row.line, key = %key, "no matching enrollment");
                ValidationError {
                    reason: ErrorReason::OtherSchemaViolation,
                    field: Some(column),
                    detail: format!("no matching enrollment for {column} '{key}'"),
                    row,
                }
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct IndexBuild<T> {
    pub index: SecondaryIndex<T>,
    pub rejected: Vec<ValidationError>,
}

pub fn build_index<T: Keyed>(accepted: Vec<Accepted<T>>, key_field: KeyField) -> IndexBuild<T> {
    let mut entries: HashMap<String, (T, RawRow)> = HashMap::with_capacity(accepted.len());
    let mut ambiguous = HashSet::new();
    let mut rejected = Vec::new();

    for Accepted { record, row } in accepted {
        let Some(raw_key) = record.key(key_field) else {
            rejected.push(ValidationError {
                reason: ErrorReason::MissingRequiredField,
                field: Some(key_field.column()),
                detail: format!("no {} to join on", key_field.column()),
                row,
            });
            continue;
        };
        let key = normalize_key(raw_key);

        if let Some((_, first)) = entries.get(&key) {
            debug!(source = %row.source, line = row.line, key = %key, "duplicate key");
            rejected.push(ValidationError {
                reason: ErrorReason::DuplicateKey,
                field: Some(key_field.column()),
                detail: format!("key '{key}' already used on line {}", first.line),
                row,
            });
            ambiguous.insert(key);
        } else {
            entries.insert(key, (record, row));
        }
    }

    // The first row of an ambiguous key joins nothing either.
    for key in &ambiguous {
        warn!(key = %key, "ambiguous key excluded from join");
        if let Some((_, row)) = entries.remove(key) {
            rejected.push(ValidationError {
                reason: ErrorReason::OtherSchemaViolation,
                field: Some(key_field.column()),
                detail: format!("key '{key}' appears on more than one row"),
                row,
            });
        }
    }

    IndexBuild {
        index: SecondaryIndex {
            key_field,
            entries,
            ambiguous,
        },
        rejected,
    }
}

/// Keeps the first enrollment per identity and per email; every later row
/// sharing either is rejected.
pub fn dedupe_enrollments(
    accepted: Vec<Accepted<EnrollmentRecord>>,
) -> (Vec<Accepted<EnrollmentRecord>>, Vec<ValidationError>) {
    let mut identities: HashMap<String, u64> = HashMap::with_capacity(accepted.len());
    let mut emails: HashMap<String, u64> = HashMap::with_capacity(accepted.len());
    let mut unique = Vec::with_capacity(accepted.len());
    let mut rejected = Vec::new();

    for entry in accepted {
        let identity = normalize_key(entry.record.identity());
        let email = normalize_key(&entry.record.email);

        let clash = if let Some(line) = identities.get(&identity) {
            let field = if entry.record.identifier.is_some() {
                "identifier"
            } else {
                "email"
            };
            Some((field, format!("identity '{identity}' already used on line {line}")))
        } else {
            emails
                .get(&email)
                .map(|line| ("email", format!("email '{email}' already used on line {line}")))
        };

        match clash {
            Some((field, detail)) => {
                debug!(line = entry.row.line, %detail, "duplicate enrollment");
                rejected.push(ValidationError {
                    reason: ErrorReason::DuplicateKey,
                    field: Some(field),
                    detail,
                    row: entry.row,
                });
            }
            None => {
                identities.insert(identity, entry.row.line);
                emails.insert(email, entry.row.line);
                unique.push(entry);
            }
        }
    }

    (unique, rejected)
}
