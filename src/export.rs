use chrono::NaiveDate;
use rust_xlsxwriter::{ColNum, Format, RowNum, Workbook};

use crate::error::ExportError;
use crate::models::{ErrorCollection, ProcessingResult, Source, StudentRecord};

pub const SPREADSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub const STUDENT_HEADERS: [&str; 17] = [
    "identity",
    "full_name",
    "email",
    "birth_date",
    "gender",
    "profession",
    "product",
    "order_id",
    "city",
    "state",
    "affiliation",
    "completed",
    "completed_on",
    "grade",
    "progress",
    "specialization",
    "situation",
];

const ERROR_PREFIX_HEADERS: [&str; 4] = ["line", "reason", "field", "detail"];
const DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(value: Option<&str>) -> Self {
        value.map_or(Cell::Empty, |value| Cell::Text(value.to_string()))
    }

    fn date(value: Option<NaiveDate>) -> Self {
        value.map_or(Cell::Empty, |date| Cell::Text(date.format(DATE_FORMAT).to_string()))
    }

    fn number(value: Option<f64>) -> Self {
        value.map_or(Cell::Empty, Cell::Number)
    }

    fn render(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(value) => value.clone(),
            Cell::Number(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

pub fn student_sheet(name: &str, students: &[StudentRecord]) -> Sheet {
    let rows = students
        .iter()
        .map(|student| {
            vec![
                Cell::Text(student.identity.clone()),
                Cell::Text(student.full_name.clone()),
                Cell::Text(student.email.clone()),
                Cell::date(student.birth_date),
                Cell::text(student.gender.as_deref()),
                Cell::text(student.profession.as_deref()),
                Cell::text(student.product.as_deref()),
                Cell::text(student.order_id.as_deref()),
                Cell::text(student.city.as_deref()),
                Cell::text(student.state.as_deref()),
                Cell::text(student.affiliation.as_deref()),
                Cell::Text(if student.completed { "yes" } else { "no" }.to_string()),
                Cell::date(student.completed_on),
                Cell::number(student.grade),
                Cell::number(student.progress),
                Cell::text(student.specialization.as_deref()),
                Cell::Text(student.situation.to_string()),
            ]
        })
        .collect();

    Sheet {
        name: name.to_string(),
        headers: STUDENT_HEADERS.iter().map(|header| header.to_string()).collect(),
        rows,
    }
}

/// Rejected rows with their reason, followed by the row's original values
/// under the uploaded file's own headers.
pub fn error_sheet(name: &str, collection: &ErrorCollection) -> Sheet {
    let width = collection
        .errors
        .iter()
        .map(|error| error.row.cells.len())
        .max()
        .unwrap_or(0)
        .max(collection.headers.len());

    let mut headers: Vec<String> = ERROR_PREFIX_HEADERS.iter().map(|header| header.to_string()).collect();
    headers.extend(collection.headers.iter().cloned());
    headers.extend((collection.headers.len()..width).map(|index| format!("extra_{}", index + 1 - collection.headers.len())));

    let rows = collection
        .errors
        .iter()
        .map(|error| {
            let mut row = vec![
                Cell::Number(error.row.line as f64),
                Cell::Text(error.reason.to_string()),
                Cell::text(error.field),
                Cell::Text(error.detail.clone()),
            ];
            row.extend((0..width).map(|index| Cell::text(error.row.cell(index))));
            row
        })
        .collect();

    Sheet {
        name: name.to_string(),
        headers,
        rows,
    }
}

pub fn sheet_name(source: Source) -> &'static str {
    match source {
        Source::Enrollments => "Enrollment Errors",
        Source::Grades => "Grade Errors",
        Source::Progress => "Progress Errors",
    }
}

pub fn result_sheets(result: &ProcessingResult, include_errors: bool) -> Vec<Sheet> {
    let mut sheets = vec![student_sheet("Valid Students", &result.valid_students)];
    if include_errors {
        sheets.extend(
            result
                .error_collections()
                .into_iter()
                .map(|collection| error_sheet(sheet_name(collection.source), collection)),
        );
    }
    sheets
}

pub fn write_workbook(sheets: &[Sheet]) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    for sheet in sheets {
        let too_large = || ExportError::SheetTooLarge {
            sheet: sheet.name.clone(),
        };
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name)?;

        for (col, header) in sheet.headers.iter().enumerate() {
            let col = ColNum::try_from(col).map_err(|_| too_large())?;
            worksheet.write_string_with_format(0, col, header, &header_format)?;
        }

        for (index, cells) in sheet.rows.iter().enumerate() {
            let row = RowNum::try_from(index + 1).map_err(|_| too_large())?;
            for (col, cell) in cells.iter().enumerate() {
                let col = ColNum::try_from(col).map_err(|_| too_large())?;
                match cell {
                    Cell::Empty => {}
                    Cell::Text(value) => {
                        worksheet.write_string(row, col, value)?;
                    }
                    Cell::Number(value) => {
                        worksheet.write_number(row, col, *value)?;
                    }
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

pub fn write_csv(sheet: &Sheet) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&sheet.headers)?;
    for cells in &sheet.rows {
        writer.write_record(cells.iter().map(Cell::render))?;
    }
    writer.into_inner().map_err(|err| ExportError::Io(err.into_error()))
}
