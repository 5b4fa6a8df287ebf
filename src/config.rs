use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_PASSING_GRADE: f64 = 7.0;
pub const DEFAULT_GRADE_SCALE: f64 = 10.0;
pub const DEFAULT_RESULT_TTL_SECS: u64 = 3600;

/// Tunables of the reconciliation pipeline. Every field has a default, so a
/// config file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Field delimiter; detected from each header line when unset.
    pub delimiter: Option<char>,
    pub passing_grade: f64,
    /// Highest grade the grades export can contain (10 or 100 in practice).
    pub grade_scale: f64,
    /// chrono patterns tried in order for every date column.
    pub date_formats: Vec<String>,
    pub result_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            delimiter: None,
            passing_grade: DEFAULT_PASSING_GRADE,
            grade_scale: DEFAULT_GRADE_SCALE,
            date_formats: vec![
                "%d/%m/%Y".to_string(),
                "%Y-%m-%d".to_string(),
                "%d-%m-%Y".to_string(),
                "%d/%m/%Y %H:%M:%S".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
            ],
            result_ttl_secs: DEFAULT_RESULT_TTL_SECS,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(delimiter) = self.delimiter {
            if !delimiter.is_ascii() || delimiter == '"' || delimiter == '\n' {
                return Err(ConfigError::Invalid(format!(
                    "delimiter {delimiter:?} must be a single ASCII character other than a quote or newline"
                )));
            }
        }
        if !(self.grade_scale.is_finite() && self.grade_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "grade_scale must be positive, got {}",
                self.grade_scale
            )));
        }
        if !(0.0..=self.grade_scale).contains(&self.passing_grade) {
            return Err(ConfigError::Invalid(format!(
                "passing_grade {} is outside the grade scale 0..={}",
                self.passing_grade, self.grade_scale
            )));
        }
        if self.date_formats.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one date format is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delimiter_byte(&self) -> Option<u8> {
        self.delimiter.and_then(|delimiter| u8::try_from(delimiter).ok())
    }

    pub fn result_ttl(&self) -> Duration {
        let secs = i64::try_from(self.result_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(i64::MAX / 1000))
    }
}
