//! Export of transformed tables.
//!
//! - CSV: comma separated, header row of display names, quoting only where needed
//! - XLSX: one sheet, bold header row
//! - JSON: array of objects keyed by display name, in column order

use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ExportError, ExportResult};
use crate::models::cell;
use crate::transform::engine::TransformedTable;

/// Excel's limit on sheet names.
const MAX_SHEET_NAME_LEN: usize = 31;
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
const DEFAULT_SHEET_NAME: &str = "Transformed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Xlsx,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ExportFormat::Json => "application/json",
        }
    }

    /// Format implied by the extension of `path`.
    pub fn from_path(path: &Path) -> ExportResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ExportError::UnsupportedFormat(path.display().to_string()))?;
        ext.parse()
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            "json" => Ok(ExportFormat::Json),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

fn header(table: &TransformedTable) -> Vec<&str> {
    table.columns.iter().map(|c| c.name.as_str()).collect()
}

// =============================================================================
// CSV
// =============================================================================

fn write_csv_to<W: std::io::Write>(table: &TransformedTable, writer: W) -> ExportResult<()> {
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    wtr.write_record(header(table))?;
    for row in &table.rows {
        wtr.write_record((0..table.columns.len()).map(|i| cell(row, i)))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn to_csv_string(table: &TransformedTable) -> ExportResult<String> {
    let mut buf = Vec::new();
    write_csv_to(table, &mut buf)?;
    String::from_utf8(buf).map_err(|e| ExportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

pub fn write_csv<P: AsRef<Path>>(table: &TransformedTable, path: P) -> ExportResult<()> {
    write_csv_to(table, std::fs::File::create(path)?)
}

// =============================================================================
// XLSX
// =============================================================================

/// Sheet name Excel accepts: forbidden characters removed, at most 31 chars.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !FORBIDDEN_SHEET_CHARS.contains(c))
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim().trim_matches('\'').to_string();
    if cleaned.is_empty() {
        DEFAULT_SHEET_NAME.to_string()
    } else {
        cleaned
    }
}

fn build_workbook(table: &TransformedTable, sheet_name: &str) -> ExportResult<Workbook> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    write_to_worksheet(table, worksheet, sheet_name)?;
    Ok(workbook)
}

fn write_to_worksheet(table: &TransformedTable, worksheet: &mut Worksheet, sheet_name: &str) -> ExportResult<()> {
    worksheet.set_name(sanitize_sheet_name(sheet_name))?;

    let bold = Format::new().set_bold();
    for (col_idx, name) in header(table).into_iter().enumerate() {
        worksheet.write_string_with_format(0, column_number(col_idx)?, name, &bold)?;
    }

    for (row_idx, row) in table.rows.iter().enumerate() {
        let row_num = u32::try_from(row_idx + 1).map_err(|_| ExportError::Xlsx("row index overflow".to_string()))?;
        for col_idx in 0..table.columns.len() {
            let value = cell(row, col_idx);
            if !value.is_empty() {
                worksheet.write_string(row_num, column_number(col_idx)?, value)?;
            }
        }
    }

    Ok(())
}

fn column_number(idx: usize) -> ExportResult<u16> {
    u16::try_from(idx).map_err(|_| ExportError::Xlsx("column index overflow".to_string()))
}

pub fn write_xlsx<P: AsRef<Path>>(table: &TransformedTable, path: P, sheet_name: &str) -> ExportResult<()> {
    let mut workbook = build_workbook(table, sheet_name)?;
    workbook.save(path.as_ref())?;
    Ok(())
}

pub fn to_xlsx_bytes(table: &TransformedTable, sheet_name: &str) -> ExportResult<Vec<u8>> {
    let mut workbook = build_workbook(table, sheet_name)?;
    Ok(workbook.save_to_buffer()?)
}

// =============================================================================
// JSON
// =============================================================================

/// One row as an object keyed by display name. A repeated name keeps its first column.
struct Record<'a> {
    names: &'a [&'a str],
    row: &'a [String],
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seen = HashSet::new();
        let mut map = serializer.serialize_map(None)?;
        for (i, name) in self.names.iter().enumerate() {
            if seen.insert(*name) {
                map.serialize_entry(name, cell(self.row, i))?;
            }
        }
        map.end()
    }
}

pub fn to_json_records(table: &TransformedTable) -> ExportResult<String> {
    let names = header(table);
    let records: Vec<Record> = table.rows.iter().map(|row| Record { names: &names, row }).collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

/// Encode `table` in `format`; `sheet_name` only applies to XLSX.
pub fn export_bytes(table: &TransformedTable, format: ExportFormat, sheet_name: &str) -> ExportResult<Vec<u8>> {
    match format {
        ExportFormat::Csv => Ok(to_csv_string(table)?.into_bytes()),
        ExportFormat::Xlsx => to_xlsx_bytes(table, sheet_name),
        ExportFormat::Json => Ok(to_json_records(table)?.into_bytes()),
    }
}

/// Write `table` to `path` in the format implied by its extension.
pub fn export_to_path(table: &TransformedTable, path: &Path, sheet_name: &str) -> ExportResult<ExportFormat> {
    let format = ExportFormat::from_path(path)?;
    match format {
        ExportFormat::Csv => write_csv(table, path)?,
        ExportFormat::Xlsx => write_xlsx(table, path, sheet_name)?,
        ExportFormat::Json => std::fs::write(path, to_json_records(table)?)?,
    }
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputColumn;

    fn table() -> TransformedTable {
        TransformedTable {
            columns: vec![
                OutputColumn::new("t1", "Part"),
                OutputColumn::new("t2", "Text"),
                OutputColumn::new("Base", "Base"),
            ],
            rows: vec![
                vec!["A-1".into(), "Seal, \"large\"".into(), "Assembly".into()],
                vec!["S-1".into(), "two\nlines".into(), "Spare".into()],
            ],
            base_column_index: 2,
        }
    }

    #[test]
    fn test_csv_quoting() {
        let csv = to_csv_string(&table()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Part,Text,Base"));
        assert_eq!(lines.next(), Some("A-1,\"Seal, \"\"large\"\"\",Assembly"));
        assert!(csv.contains("\"two\nlines\""));
    }

    #[test]
    fn test_json_keyed_by_name_in_order() {
        let json = to_json_records(&table()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["Part"], "A-1");
        assert_eq!(value[1]["Base"], "Spare");
        assert!(json.find("\"Part\"").unwrap() < json.find("\"Text\"").unwrap());
        assert!(json.find("\"Text\"").unwrap() < json.find("\"Base\"").unwrap());
    }

    #[test]
    fn test_json_duplicate_names_keep_first() {
        let mut t = table();
        t.columns[1].name = "Part".into();
        let value: serde_json::Value = serde_json::from_str(&to_json_records(&t).unwrap()).unwrap();
        assert_eq!(value[0]["Part"], "A-1");
        assert_eq!(value[0].as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_sheet_name_sanitized() {
        assert_eq!(sanitize_sheet_name("plant/line [A]: spares?"), "plantline A spares");
        assert_eq!(sanitize_sheet_name(&"x".repeat(40)).len(), 31);
        assert_eq!(sanitize_sheet_name("[]"), DEFAULT_SHEET_NAME);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!(".xlsx".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::from_path(Path::new("out.json")).unwrap(), ExportFormat::Json);
        assert!(matches!("pdf".parse::<ExportFormat>(), Err(ExportError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_xlsx_written_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        assert_eq!(export_to_path(&table(), &path, "Plant: line 1").unwrap(), ExportFormat::Xlsx);

        let raw = crate::parser::read_xlsx(&path, Some("Plant line 1")).unwrap();
        assert_eq!(raw.rows[0], vec!["Part", "Text", "Base"]);
        assert_eq!(raw.rows[1][0], "A-1");
        assert!(!to_xlsx_bytes(&table(), "t").unwrap().is_empty());
    }
}
