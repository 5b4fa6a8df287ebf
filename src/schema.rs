//! Fixed column sets of the three exports and header resolution.
//!
//! Columns are listed in declaration order, which is also the order the
//! validator checks a row's fields in.

use crate::error::FileFormatError;
use crate::identity::KeyField;
use crate::models::{RawRow, Source};

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

const fn column(name: &'static str, aliases: &'static [&'static str]) -> Column {
    Column { name, aliases }
}

pub const ENROLLMENT_COLUMNS: &[Column] = &[
    column("identifier", &["identity", "identificador", "id"]),
    column("order_id", &["pedido"]),
    column("product", &["produto"]),
    column("full_name", &["name", "nome", "nome_completo", "nome_inscricao"]),
    column("birth_date", &["nascimento"]),
    column("gender", &["genero", "gênero"]),
    column("email", &["email_inscricao"]),
    column("profession", &["profissao", "profissão"]),
    column("specialization", &["especialidade"]),
    column("affiliation", &["vinculo", "vínculo"]),
    column("city", &["cidade"]),
    column("state", &["estado"]),
    column("completed", &["concluido", "concluído"]),
    column("completed_on", &["data_conclusao", "data_conclusão"]),
];

pub const GRADE_COLUMNS: &[Column] = &[
    column("first_name", &["nome_nota"]),
    column("last_name", &["sobrenome_nota"]),
    column("email", &["email_nota"]),
    column("grade", &["nota"]),
    column("passed", &["aprovado"]),
];

pub const PROGRESS_COLUMNS: &[Column] = &[
    column("email", &["email_progresso"]),
    column("full_name", &["name", "nome", "nome_completo", "nome_progresso"]),
    column("progress", &["progresso"]),
    column("track", &["trilha", "especializacao", "especialização"]),
];

pub fn columns(source: Source) -> &'static [Column] {
    match source {
        Source::Enrollments => ENROLLMENT_COLUMNS,
        Source::Grades => GRADE_COLUMNS,
        Source::Progress => PROGRESS_COLUMNS,
    }
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Where each known column sits in one uploaded file's header.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    source: Source,
    indices: Vec<Option<usize>>,
    key_field: KeyField,
}

impl ColumnMap {
    pub fn resolve(source: Source, headers: &[String]) -> Result<Self, FileFormatError> {
        let normalized: Vec<String> = headers.iter().map(|header| normalize_header(header)).collect();
        let indices: Vec<Option<usize>> = columns(source)
            .iter()
            .map(|column| {
                normalized.iter().position(|header| {
                    header == column.name || column.aliases.contains(&header.as_str())
                })
            })
            .collect();

        let mut map = Self {
            source,
            indices,
            key_field: KeyField::Email,
        };

        let mut missing = Vec::new();
        match source {
            Source::Enrollments => {
                missing.extend(["full_name", "email"].into_iter().filter(|name| !map.has(name)));
            }
            Source::Grades => {
                missing.extend(["email", "grade"].into_iter().filter(|name| !map.has(name)));
            }
            Source::Progress => {
                if !map.has("email") {
                    if map.has("full_name") {
                        map.key_field = KeyField::FullName;
                    } else {
                        missing.push("email");
                    }
                }
                if !map.has("progress") {
                    missing.push("progress");
                }
            }
        }

        if missing.is_empty() {
            Ok(map)
        } else {
            Err(FileFormatError::MissingColumns {
                file: source,
                columns: missing,
            })
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// The column this file's rows are joined on.
    pub fn key_field(&self) -> KeyField {
        self.key_field
    }

    pub fn index(&self, name: &str) -> Option<usize> {
        columns(self.source)
            .iter()
            .position(|column| column.name == name)
            .and_then(|position| self.indices[position])
    }

    pub fn has(&self, name: &str) -> bool {
        self.index(name).is_some()
    }

    pub fn value<'r>(&self, row: &'r RawRow, name: &str) -> Option<&'r str> {
        self.index(name).and_then(|index| row.cell(index))
    }
}
