use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::models::Source;

/// Problems with an uploaded file as a whole. Any of these aborts the request.
#[derive(Error, Debug)]
pub enum FileFormatError {
    #[error("{file} file is empty or has no header row")]
    Empty { file: Source },

    #[error("{file} file is not valid UTF-8 (first bad byte at offset {offset})")]
    Encoding { file: Source, offset: usize },

    #[error("{file} file is missing required column(s): {}", .columns.join(", "))]
    MissingColumns {
        file: Source,
        columns: Vec<&'static str>,
    },

    #[error("{file} file could not be read: {message}")]
    Malformed { file: Source, message: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    FileFormat(#[from] FileFormatError),

    #[error("internal processing fault while {stage} {file}: {message}")]
    Internal {
        file: Source,
        stage: &'static str,
        message: String,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("processing request {0} not found")]
    RequestNotFound(Uuid),

    #[error("processing request {0} was already stored")]
    AlreadyStored(Uuid),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("workbook error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sheet '{sheet}' has more rows or columns than a worksheet can hold")]
    SheetTooLarge { sheet: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
