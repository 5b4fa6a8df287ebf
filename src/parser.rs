use std::sync::Arc;

use crate::error::FileFormatError;
use crate::models::{RawRow, Source};

#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub source: Source,
    pub delimiter: u8,
    pub headers: Arc<[String]>,
    pub rows: Vec<RawRow>,
}

/// Picks `;` or `,` by counting both in the header line. Ties go to `;`.
pub fn detect_delimiter(header_line: &str) -> u8 {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    if commas > semicolons {
        b','
    } else {
        b';'
    }
}

pub fn parse(bytes: &[u8], source: Source, delimiter: Option<u8>) -> Result<ParsedFile, FileFormatError> {
    let text = std::str::from_utf8(bytes).map_err(|err| FileFormatError::Encoding {
        file: source,
        offset: err.valid_up_to(),
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    // Leading lines holding only whitespace are not a header.
    let mut start = 0;
    let mut skipped_lines = 0u64;
    for line in text.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
        skipped_lines += 1;
    }
    let body = &text[start..];
    let header_line = body
        .lines()
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or(FileFormatError::Empty { file: source })?;
    let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(header_line));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers: Arc<[String]> = reader
        .headers()
        .map_err(|err| malformed(source, err))?
        .iter()
        .map(str::to_lowercase)
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(FileFormatError::Empty { file: source });
    }

    let mut lines = LineCounter::new(body, skipped_lines);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| malformed(source, err))?;
        let mut cells: Vec<Option<String>> = record
            .iter()
            .map(|value| (!value.is_empty()).then(|| value.to_string()))
            .collect();
        if cells.iter().all(Option::is_none) {
            continue;
        }

        let field_count = cells.len();
        if cells.len() < headers.len() {
            cells.resize(headers.len(), None);
        }
        let line = record
            .position()
            .map(|pos| lines.line_at(pos.byte()))
            .unwrap_or_default();
        rows.push(RawRow {
            source,
            line,
            headers: Arc::clone(&headers),
            cells,
            field_count,
        });
    }

    Ok(ParsedFile {
        source,
        delimiter,
        headers,
        rows,
    })
}

/// Physical line numbers from record offsets. A record's offset is where the
/// reader stopped after the previous record, which can still be inside that
/// record's `\r\n` terminator or before skipped blank lines, so terminator
/// bytes are stepped over before counting.
struct LineCounter<'a> {
    text: &'a [u8],
    byte: usize,
    line: u64,
}

impl<'a> LineCounter<'a> {
    fn new(text: &'a str, skipped_lines: u64) -> Self {
        Self {
            text: text.as_bytes(),
            byte: 0,
            line: skipped_lines + 1,
        }
    }

    /// Offsets must not decrease between calls.
    fn line_at(&mut self, offset: u64) -> u64 {
        let mut start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.text.len());
        while matches!(self.text.get(start), Some(b'\r' | b'\n')) {
            start += 1;
        }
        if start > self.byte {
            let newlines = self.text[self.byte..start].iter().filter(|&&b| b == b'\n').count();
            self.line += newlines as u64;
            self.byte = start;
        }
        self.line
    }
}

fn malformed(source: Source, err: csv::Error) -> FileFormatError {
    FileFormatError::Malformed {
        file: source,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_delimiter_from_header() {
        assert_eq!(detect_delimiter("nome;email;nota"), b';');
        assert_eq!(detect_delimiter("name,email,grade"), b',');
        assert_eq!(detect_delimiter("email"), b';');
    }

    #[test]
    fn parses_semicolon_file_with_bom() {
        let bytes = "\u{feff}email;nota\r\n a@x.com ;8\r\nb@x.com;\r\n".as_bytes();
        let file = parse(bytes, Source::Grades, None).unwrap();

        assert_eq!(file.delimiter, b';');
        assert_eq!(&*file.headers, ["email".to_string(), "nota".to_string()]);
        assert_eq!(file.rows.len(), 2);
        assert_eq!(file.rows[0].line, 2);
        assert_eq!(file.rows[0].cell(0), Some("a@x.com"));
        assert_eq!(file.rows[0].cell(1), Some("8"));
        assert_eq!(file.rows[1].cell(1), None);
        assert!(!file.rows[1].has_extra_fields());
    }

    #[test]
    fn keeps_physical_line_numbers_across_blank_lines() {
        let bytes = b"email,grade\na@x.com,8\n\n,\nc@x.com,5\n";
        let file = parse(bytes, Source::Grades, None).unwrap();

        let lines: Vec<u64> = file.rows.iter().map(|row| row.line).collect();
        assert_eq!(lines, vec![2, 5]);
    }

    #[test]
    fn pads_short_rows_and_keeps_long_rows() {
        let bytes = b"email,grade,passed\na@x.com\nb@x.com,7,yes,extra\n";
        let file = parse(bytes, Source::Grades, Some(b',')).unwrap();

        assert_eq!(file.rows[0].field_count, 1);
        assert_eq!(file.rows[0].cells.len(), 3);
        assert!(!file.rows[0].has_extra_fields());
        assert!(file.rows[1].has_extra_fields());
        assert_eq!(file.rows[1].field_count, 4);
        assert_eq!(file.rows[1].cell(3), Some("extra"));
    }

    #[test]
    fn configured_delimiter_wins_over_detection() {
        let bytes = b"name;note,email\nAna;x,a@x.com\n";
        let file = parse(bytes, Source::Enrollments, Some(b';')).unwrap();
        assert_eq!(file.headers.len(), 2);
        assert_eq!(file.rows[0].cell(1), Some("x,a@x.com"));
    }

    #[test]
    fn crlf_rows_keep_their_physical_lines() {
        let bytes = b"email;nota\r\na@x.com;8\r\n\r\nb@x.com;9\r\nc@x.com;7";
        let file = parse(bytes, Source::Grades, None).unwrap();

        let lines: Vec<u64> = file.rows.iter().map(|row| row.line).collect();
        assert_eq!(lines, vec![2, 4, 5]);
    }

    #[test]
    fn quoted_newlines_do_not_shift_later_lines() {
        let bytes = b"email,note\r\na@x.com,\"two\r\nlines\"\r\nb@x.com,x\r\n";
        let file = parse(bytes, Source::Grades, None).unwrap();

        assert_eq!(file.rows[0].cell(1), Some("two\r\nlines"));
        let lines: Vec<u64> = file.rows.iter().map(|row| row.line).collect();
        assert_eq!(lines, vec![2, 4]);
    }

    #[test]
    fn leading_whitespace_lines_are_skipped() {
        let bytes = b"   \n\t\nfull_name;email\nAna;a@x.com\n";
        let file = parse(bytes, Source::Enrollments, None).unwrap();

        assert_eq!(&*file.headers, ["full_name".to_string(), "email".to_string()]);
        assert_eq!(file.rows.len(), 1);
        assert_eq!(file.rows[0].line, 4);
        assert_eq!(file.rows[0].cell(0), Some("Ana"));
    }

    #[test]
    fn header_names_are_lowercased() {
        let file = parse(b" Email ;NOTA\na@x.com;8\n", Source::Grades, None).unwrap();
        assert_eq!(&*file.headers, ["email".to_string(), "nota".to_string()]);
    }

    #[test]
    fn empty_input_is_a_file_error() {
        let err = parse(b"  \n\n", Source::Progress, None).unwrap_err();
        assert!(matches!(err, FileFormatError::Empty { file: Source::Progress }));
    }

    #[test]
    fn invalid_utf8_is_a_file_error() {
        let err = parse(&[b'e', b'm', 0xff, b'\n'], Source::Enrollments, None).unwrap_err();
        assert!(matches!(err, FileFormatError::Encoding { offset: 2, .. }));
    }
}
