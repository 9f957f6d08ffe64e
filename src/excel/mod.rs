//! Spreadsheet reading for the bulk-upload endpoints.
//!
//! Wraps calamine behind a small header-aware `Sheet` type so the upload
//! handlers can look cells up by column name regardless of column order,
//! and normalizes the cell soup (floats for IDs, native date cells, text
//! dates) into plain strings.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook contains no sheets")]
    NoSheets,
    #[error("sheet contains no header row")]
    Empty,
}

/// First worksheet of an uploaded workbook, split into a header row and
/// data rows.
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Data>>,
}

impl Sheet {
    /// Parse the first worksheet out of raw .xlsx/.xls bytes. The first
    /// row is treated as the header row.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Sheet, SheetError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
        let name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or(SheetError::NoSheets)?;
        let range = workbook.worksheet_range(&name)?;

        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .ok_or(SheetError::Empty)?
            .iter()
            .map(cell_to_string)
            .collect();
        let rows = rows.map(|row| row.to_vec()).collect();

        Ok(Sheet { headers, rows })
    }

    /// Column index for a header, matched case-insensitively after
    /// trimming. Uploads come from several branches and header casing is
    /// not consistent between them.
    pub fn header_index(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }

    /// Cell at `column` in `row` rendered as a trimmed string, empty when
    /// the cell is missing or blank.
    pub fn string_at(&self, row: &[Data], column: Option<usize>) -> String {
        column
            .and_then(|idx| row.get(idx))
            .map(cell_to_string)
            .unwrap_or_default()
    }

    /// Cell at `column` in `row` interpreted as an ISO date, if possible
    pub fn date_at(&self, row: &[Data], column: Option<usize>) -> Option<String> {
        column.and_then(|idx| row.get(idx)).and_then(cell_to_date)
    }
}

/// Render a cell as a string. Numeric cells holding identifiers come back
/// from the parser as floats, so integral floats are printed without the
/// trailing `.0`.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
    }
}

/// Interpret a cell as a calendar date in `YYYY-MM-DD` form. Handles
/// native Excel date cells as well as the text formats branches type in
/// by hand.
pub fn cell_to_date(cell: &Data) -> Option<String> {
    match cell {
        Data::DateTime(dt) => dt.as_datetime().map(|d| d.format("%Y-%m-%d").to_string()),
        Data::DateTimeIso(s) => s.get(..10).map(|d| d.to_string()),
        Data::String(s) => parse_text_date(s.trim()),
        _ => None,
    }
}

fn parse_text_date(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(text, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn sample_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write(0, 0, "DATE").unwrap();
        sheet.write(0, 1, "App ID").unwrap();
        sheet.write(0, 2, "Name").unwrap();
        sheet.write(1, 0, "2024-03-15").unwrap();
        sheet.write(1, 1, 900123456.0).unwrap();
        sheet.write(1, 2, "  Jane Doe  ").unwrap();
        sheet.write(2, 0, "15/03/2024").unwrap();
        sheet.write(2, 1, "APP-77").unwrap();
        sheet.write(2, 2, "John Roe").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn parses_headers_and_rows() {
        let sheet = Sheet::from_bytes(sample_workbook()).unwrap();
        assert_eq!(sheet.headers, vec!["DATE", "App ID", "Name"]);
        assert_eq!(sheet.rows.len(), 2);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let sheet = Sheet::from_bytes(sample_workbook()).unwrap();
        assert_eq!(sheet.header_index("app id"), Some(1));
        assert_eq!(sheet.header_index("NAME"), Some(2));
        assert_eq!(sheet.header_index("Card"), None);
    }

    #[test]
    fn numeric_ids_lose_the_float_suffix() {
        let sheet = Sheet::from_bytes(sample_workbook()).unwrap();
        let id = sheet.string_at(&sheet.rows[0], sheet.header_index("App ID"));
        assert_eq!(id, "900123456");
    }

    #[test]
    fn strings_are_trimmed() {
        let sheet = Sheet::from_bytes(sample_workbook()).unwrap();
        let name = sheet.string_at(&sheet.rows[0], sheet.header_index("Name"));
        assert_eq!(name, "Jane Doe");
    }

    #[test]
    fn text_dates_normalize_to_iso() {
        let sheet = Sheet::from_bytes(sample_workbook()).unwrap();
        let date_col = sheet.header_index("DATE");
        assert_eq!(
            sheet.date_at(&sheet.rows[0], date_col),
            Some("2024-03-15".to_string())
        );
        assert_eq!(
            sheet.date_at(&sheet.rows[1], date_col),
            Some("2024-03-15".to_string())
        );
    }

    #[test]
    fn missing_cells_read_as_empty() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write(0, 0, "App ID").unwrap();
        sheet.write(0, 1, "Name").unwrap();
        sheet.write(1, 0, "APP-1").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let parsed = Sheet::from_bytes(bytes).unwrap();
        let name = parsed.string_at(&parsed.rows[0], parsed.header_index("Name"));
        assert_eq!(name, "");
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(Sheet::from_bytes(vec![0u8; 64]).is_err());
    }
}
