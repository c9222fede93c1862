//! Spreadsheet ingestion with encoding and delimiter auto-detection.
//!
//! Delimited text and XLSX workbooks both come out as a [`RawSheet`]: every
//! line/row in file order, every cell as a string. [`build_table`] then
//! separates the header rows from the data and names the source columns.

use calamine::{open_workbook, Data, Reader, Xlsx, XlsxError};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use crate::error::{SheetError, SheetResult};
use crate::models::{cell, ColumnType, Row, SourceColumn};
use crate::transform::headers::{data_start_index, derive_leaf_headers, header_row_indices, DEFAULT_MAX_HEADER_ROWS};

/// Raw cell grid of one sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSheet {
    pub rows: Vec<Row>,
    /// Detected encoding; `"xlsx"` for workbooks.
    pub encoding: String,
    /// Detected delimiter; `None` for workbooks.
    pub delimiter: Option<char>,
}

/// A sheet split into named columns and data rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTable {
    pub source_columns: Vec<SourceColumn>,
    pub header_rows: Vec<Row>,
    pub rows: Vec<Row>,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> SheetResult<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
    let decoded = match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(bytes).into_owned(),
        },
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        other => match encoding_rs::Encoding::for_label(other.as_bytes()) {
            Some(enc) => {
                let (text, _, had_errors) = enc.decode(bytes);
                if had_errors {
                    return Err(SheetError::Encoding(format!("content is not valid {}", other)));
                }
                text.into_owned()
            }
            None => String::from_utf8_lossy(bytes).into_owned(),
        },
    };
    Ok(decoded)
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [';', ',', '\t', '|'];
    let mut best_sep = ';';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Split delimited text into rows. Quoted fields may hold delimiters and newlines.
pub fn parse_delimited(content: &str, delimiter: char) -> SheetResult<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| SheetError::Parse {
            line: e.position().map(|p| p.line() as usize).unwrap_or(0),
            message: e.to_string(),
        })?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Parse delimited bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> SheetResult<RawSheet> {
    if bytes.is_empty() {
        return Err(SheetError::EmptyFile);
    }

    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding)?;
    let delimiter = detect_delimiter(&content);
    let rows = parse_delimited(&content, delimiter)?;

    if rows.is_empty() {
        return Err(SheetError::EmptyFile);
    }

    Ok(RawSheet {
        rows,
        encoding,
        delimiter: Some(delimiter),
    })
}

/// Read one worksheet (the first by default) of an XLSX file.
pub fn read_xlsx<P: AsRef<Path>>(path: P, sheet: Option<&str>) -> SheetResult<RawSheet> {
    let workbook: Xlsx<BufReader<File>> =
        open_workbook(path.as_ref()).map_err(|e: XlsxError| SheetError::Xlsx(e.to_string()))?;
    read_workbook(workbook, sheet)
}

/// Same as [`read_xlsx`] for an in-memory workbook (uploads).
pub fn read_xlsx_bytes(bytes: &[u8], sheet: Option<&str>) -> SheetResult<RawSheet> {
    let workbook = Xlsx::new(Cursor::new(bytes.to_vec())).map_err(|e: XlsxError| SheetError::Xlsx(e.to_string()))?;
    read_workbook(workbook, sheet)
}

fn read_workbook<RS: Read + Seek>(mut workbook: Xlsx<RS>, sheet: Option<&str>) -> SheetResult<RawSheet> {
    let name = match sheet {
        Some(s) => s.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or(SheetError::EmptyFile)?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e: XlsxError| SheetError::Xlsx(e.to_string()))?;

    let rows: Vec<Row> = range.rows().map(|r| r.iter().map(data_to_string).collect()).collect();
    if rows.is_empty() {
        return Err(SheetError::EmptyFile);
    }

    Ok(RawSheet {
        rows,
        encoding: "xlsx".to_string(),
        delimiter: None,
    })
}

fn data_to_string(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Bool(b) => b.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_number(*f),
        Data::DateTime(dt) => format_number(dt.as_f64()),
        Data::Error(e) => format!("#ERROR: {:?}", e),
    }
}

/// Whole floats print without the trailing `.0`.
fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_lowercase().as_str(), "xlsx" | "xlsm" | "xls"))
}

/// Load any supported file: workbooks by extension, everything else as delimited text.
pub fn load_sheet<P: AsRef<Path>>(path: P) -> SheetResult<RawSheet> {
    let path = path.as_ref();
    if is_workbook(path) {
        read_xlsx(path, None)
    } else {
        parse_bytes_auto(&std::fs::read(path)?)
    }
}

/// Same as [`load_sheet`] for uploaded bytes; `file_name` only selects the format.
pub fn load_bytes(bytes: &[u8], file_name: Option<&str>) -> SheetResult<RawSheet> {
    match file_name {
        Some(name) if is_workbook(Path::new(name)) => read_xlsx_bytes(bytes, None),
        _ => parse_bytes_auto(bytes),
    }
}

/// Split a raw sheet into header rows, named source columns and data rows.
///
/// Columns get ids `s1..sN` and their leaf header as name. Data rows that
/// are entirely blank are dropped; the rest are padded to the column count.
pub fn build_table(raw: &RawSheet, max_header_rows: Option<usize>) -> SourceTable {
    let max = max_header_rows.unwrap_or(DEFAULT_MAX_HEADER_ROWS);
    let mut names = derive_leaf_headers(&raw.rows, max);
    let header_rows: Vec<Row> = header_row_indices(&raw.rows, max)
        .into_iter()
        .map(|i| raw.rows[i].clone())
        .collect();

    let data: Vec<&Row> = raw.rows[data_start_index(&raw.rows, max)..]
        .iter()
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
        .collect();

    let width = data.iter().map(|r| r.len()).max().unwrap_or(0).max(names.len());
    while names.len() < width {
        names.push(format!("Column {}", names.len() + 1));
    }

    let rows: Vec<Row> = data
        .iter()
        .map(|r| (0..width).map(|i| cell(r, i).to_string()).collect())
        .collect();

    let source_columns = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| SourceColumn::new(format!("s{}", i + 1), name).with_type(infer_column_type(&rows, i)))
        .collect();

    SourceTable {
        source_columns,
        header_rows,
        rows,
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%m/%d/%Y"];

/// Type shared by every non-empty cell of column `idx`; `String` otherwise.
pub fn infer_column_type(rows: &[Row], idx: usize) -> ColumnType {
    let values: Vec<&str> = rows
        .iter()
        .map(|r| cell(r, idx).trim())
        .filter(|v| !v.is_empty())
        .collect();

    if values.is_empty() {
        ColumnType::String
    } else if values.iter().all(|v| v.parse::<f64>().is_ok()) {
        ColumnType::Number
    } else if values
        .iter()
        .all(|v| v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("false"))
    {
        ColumnType::Boolean
    } else if values
        .iter()
        .all(|v| DATE_FORMATS.iter().any(|f| NaiveDate::parse_from_str(v, f).is_ok()))
    {
        ColumnType::Date
    } else {
        ColumnType::String
    }
}
