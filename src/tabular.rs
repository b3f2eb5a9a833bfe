use calamine::{Data, Range, Reader, Xls, XlsError, Xlsx, XlsxError, open_workbook_from_rs};
use std::{
    collections::BTreeMap,
    io::{Cursor, Read, Seek},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported file format `{0}`; expected csv, xlsx or xls")]
    UnsupportedFormat(String),
    #[error("unable to decode spreadsheet: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Xlsx,
    Xls,
}

impl SheetFormat {
    /// Accepts `csv`, `.CSV`, `xlsx`, ... Anything else is unsupported.
    pub fn from_extension(extension: &str) -> Result<Self, DecodeError> {
        let normalized = extension.trim().trim_start_matches('.').to_lowercase();
        match normalized.as_str() {
            "csv" => Ok(SheetFormat::Csv),
            "xlsx" => Ok(SheetFormat::Xlsx),
            "xls" => Ok(SheetFormat::Xls),
            _ => Err(DecodeError::UnsupportedFormat(extension.trim().to_string())),
        }
    }
}

/// Extension of an uploaded file name, if it has one.
pub fn extension_of(filename: &str) -> Option<&str> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// A spreadsheet cell under a known header. Blank cells are `Text("")`.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Text(value) if value.trim().is_empty())
    }

    pub fn as_text(&self) -> String {
        match self {
            CellValue::Text(value) => value.trim().to_string(),
            CellValue::Number(value) => format_number(*value),
            CellValue::Bool(value) => value.to_string(),
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

/// One spreadsheet row keyed by header name. A column missing from a short
/// CSV record has no entry; a blank cell is kept as `Text("")`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: BTreeMap<String, CellValue>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        self.cells.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells.get(column)
    }

    /// Trimmed text of a cell, `None` when absent or blank.
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column)
            .map(CellValue::as_text)
            .filter(|value| !value.is_empty())
    }

    /// True when every cell is blank.
    pub fn is_empty(&self) -> bool {
        self.cells.values().all(CellValue::is_blank)
    }
}

impl<K: Into<String>> FromIterator<(K, CellValue)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, CellValue)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

/// Decodes a whole CSV or Excel file held in memory into rows, in file order.
pub fn decode(bytes: &[u8], extension: &str) -> Result<Vec<RawRow>, DecodeError> {
    match SheetFormat::from_extension(extension)? {
        SheetFormat::Csv => decode_csv(bytes),
        SheetFormat::Xlsx => {
            let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
                .map_err(|err: XlsxError| DecodeError::Malformed(err.to_string()))?;
            decode_first_sheet(workbook)
        }
        SheetFormat::Xls => {
            let workbook: Xls<_> = open_workbook_from_rs(Cursor::new(bytes))
                .map_err(|err: XlsError| DecodeError::Malformed(err.to_string()))?;
            decode_first_sheet(workbook)
        }
    }
}

fn decode_csv(bytes: &[u8]) -> Result<Vec<RawRow>, DecodeError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| DecodeError::Malformed(err.to_string()))?
        .iter()
        .map(|header| header.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| DecodeError::Malformed(err.to_string()))?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, value)| (header.clone(), CellValue::Text(value.to_string())))
            .collect();
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn decode_first_sheet<RS, R>(mut workbook: R) -> Result<Vec<RawRow>, DecodeError>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let range: Range<Data> = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| DecodeError::Malformed("workbook has no worksheets".into()))?
        .map_err(|err| DecodeError::Malformed(err.to_string()))?;

    let mut sheet_rows = range.rows();
    let Some(header_row) = sheet_rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row
        .iter()
        .map(|cell| cell_to_value(cell).map(|v| v.as_text()).unwrap_or_default())
        .collect();

    let mut rows = Vec::new();
    for sheet_row in sheet_rows {
        let row: RawRow = headers
            .iter()
            .zip(sheet_row.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, cell)| {
                let value = cell_to_value(cell).unwrap_or_else(|| CellValue::Text(String::new()));
                (header.clone(), value)
            })
            .collect();
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn cell_to_value(cell: &Data) -> Option<CellValue> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.trim().is_empty() => None,
        Data::String(s) => Some(CellValue::Text(s.clone())),
        Data::Int(i) => Some(CellValue::Number(*i as f64)),
        Data::Float(f) => Some(CellValue::Number(*f)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::DateTime(_) => Some(CellValue::Text(cell.to_string())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    #[test]
    fn csv_headers_are_trimmed_and_blank_lines_skipped() {
        let csv = " name , categorySlug ,priceMin\nSilk Kurta,suits-set,1200\n\n,,\nCotton Set,suits-set,\n";
        let rows = decode(csv.as_bytes(), "csv").expect("decode");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("name").as_deref(), Some("Silk Kurta"));
        assert_eq!(rows[0].text("priceMin").as_deref(), Some("1200"));
        assert_eq!(rows[1].text("categorySlug").as_deref(), Some("suits-set"));
        assert!(rows[1].text("priceMin").is_none());
        assert_eq!(rows[1].get("priceMin"), Some(&CellValue::Text(String::new())));
    }

    #[test]
    fn csv_handles_bom_and_quoted_commas() {
        let csv = "\u{feff}name,galleryImages\n\"Anarkali\",\"https://a.test/1.jpg, ./img/2.jpg\"\n";
        let rows = decode(csv.as_bytes(), ".CSV").expect("decode");
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].text("galleryImages").as_deref(),
            Some("https://a.test/1.jpg, ./img/2.jpg")
        );
    }

    #[test]
    fn csv_short_rows_leave_columns_absent() {
        let csv = "name,description,tags\nKurta,Soft cotton\n";
        let rows = decode(csv.as_bytes(), "csv").expect("decode");
        assert!(rows[0].text("description").is_some());
        assert!(rows[0].get("tags").is_none());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = decode(b"{}", "json").expect_err("json is not a sheet");
        assert!(matches!(err, DecodeError::UnsupportedFormat(ext) if ext == "json"));
    }

    #[test]
    fn garbage_xlsx_is_malformed() {
        let err = decode(b"not a zip archive", "xlsx").expect_err("should fail");
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn xlsx_reads_first_sheet_with_typed_cells() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "name").unwrap();
        sheet.write_string(0, 1, " styleCode ").unwrap();
        sheet.write_string(0, 2, "isFeatured").unwrap();
        sheet.write_string(0, 3, "priceMax").unwrap();
        sheet.write_string(1, 0, "Printed Suit").unwrap();
        sheet.write_number(1, 1, 1001.0).unwrap();
        sheet.write_boolean(1, 2, true).unwrap();
        sheet.write_number(1, 3, 2499.5).unwrap();
        sheet.write_string(3, 0, "Plain Suit").unwrap();
        let other = workbook.add_worksheet();
        other.write_string(0, 0, "ignored").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let rows = decode(&bytes, "xlsx").expect("decode");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("styleCode").as_deref(), Some("1001"));
        assert_eq!(rows[0].get("isFeatured"), Some(&CellValue::Bool(true)));
        assert_eq!(rows[0].get("priceMax"), Some(&CellValue::Number(2499.5)));
        assert_eq!(rows[1].text("name").as_deref(), Some("Plain Suit"));
    }

    #[test]
    fn extension_of_uses_last_segment() {
        assert_eq!(extension_of("uploads/batch.v2.xlsx"), Some("xlsx"));
        assert_eq!(extension_of("C:\\sheets\\products.CSV"), Some("CSV"));
        assert_eq!(extension_of("README"), None);
    }
}
