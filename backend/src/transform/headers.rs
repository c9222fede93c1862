//! Multi-row header detection.
//!
//! Spreadsheets exported from engineering tools often carry grouped headers:
//!
//! ```text
//! ┌──────────┬──────┬──────────────────────────┬──────────────────┐
//! │ Scope    │      │ Spare Part Specification │                  │  ← group row
//! ├──────────┼──────┼──────────────────────────┼──────────────────┤
//! │ Line-No. │ Unit │ PSP/WBS-No.              │ SMS Material No. │  ← leaf row
//! ├──────────┼──────┼──────────────────────────┼──────────────────┤
//! │ 1        │ ...  │ A0479.ME09.1100          │ 09/10.1100.5     │  ← data
//! ```
//!
//! [`detect_header_rows`] finds the leading header-like rows and
//! [`derive_leaf_headers`] flattens them to one label per column.

use crate::models::Row;

/// Default ceiling on consecutive header rows.
pub const DEFAULT_MAX_HEADER_ROWS: usize = 10;

/// Only this many leading rows are ever inspected.
const HEADER_SCAN_ROWS: usize = 20;

const MAX_HEADER_CELL_LEN: usize = 100;
const MAX_NON_WORD_CHARS: usize = 3;
const FIRST_ROW_THRESHOLD: f64 = 0.3;
const NEXT_ROW_THRESHOLD: f64 = 0.6;

/// Whether a single cell reads like a column label rather than data.
pub fn is_header_cell(cell: &str) -> bool {
    let s = cell.trim();
    if s.is_empty() {
        return false;
    }

    let len = s.chars().count();
    if len > MAX_HEADER_CELL_LEN {
        return false;
    }

    // Codes like "A0479.ME09.1100" or "09/10.1100.5"
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    let digit_ratio = digits as f64 / len as f64;
    if digit_ratio > 0.5 && s.contains(['.', '/']) {
        return false;
    }

    let non_word = s.chars().filter(|&c| !is_label_char(c)).count();
    if non_word > MAX_NON_WORD_CHARS {
        return false;
    }

    s.chars().any(|c| c.is_ascii_alphabetic())
}

/// `[\w\s\-()&.,/]`
fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        || c.is_whitespace()
        || matches!(c, '-' | '(' | ')' | '&' | '.' | ',' | '/')
}

/// Positions of the detected header rows within `rows`.
///
/// Blank rows are skipped without ending the scan; the first non-blank row
/// below its threshold ends it. Falls back to row 0 when nothing qualifies.
pub fn header_row_indices(rows: &[Row], max_header_rows: usize) -> Vec<usize> {
    if rows.is_empty() {
        return Vec::new();
    }

    let limit = rows.len().min(HEADER_SCAN_ROWS).min(max_header_rows);
    let mut found = Vec::new();

    for (i, row) in rows.iter().enumerate().take(limit) {
        let non_empty = row.iter().filter(|c| !c.trim().is_empty()).count();
        if non_empty == 0 {
            continue;
        }

        let header_like = row.iter().filter(|c| is_header_cell(c)).count();
        let ratio = header_like as f64 / non_empty as f64;
        let threshold = if i == 0 { FIRST_ROW_THRESHOLD } else { NEXT_ROW_THRESHOLD };

        if ratio >= threshold {
            found.push(i);
        } else {
            break;
        }
    }

    if found.is_empty() && !rows[0].is_empty() {
        found.push(0);
    }
    found
}

/// Header rows at the top of `rows`, cells trimmed.
pub fn detect_header_rows(rows: &[Row], max_header_rows: usize) -> Vec<Row> {
    header_row_indices(rows, max_header_rows)
        .into_iter()
        .map(|i| rows[i].iter().map(|c| c.trim().to_string()).collect())
        .collect()
}

/// One leaf label per column.
///
/// Walking each column top to bottom, the last non-empty header cell wins,
/// so a group label fills blank subheader cells and a subheader overrides its
/// group. Columns without any label become `"Column {n}"` (1-based).
pub fn derive_leaf_headers(rows: &[Row], max_header_rows: usize) -> Vec<String> {
    let header_rows = detect_header_rows(rows, max_header_rows);
    let width = header_rows.iter().map(Vec::len).max().unwrap_or(0);

    (0..width)
        .map(|col| {
            header_rows
                .iter()
                .filter_map(|r| r.get(col))
                .filter(|v| !v.is_empty())
                .last()
                .cloned()
                .unwrap_or_else(|| format!("Column {}", col + 1))
        })
        .collect()
}

/// Number of leading rows consumed by the header (data starts here).
pub fn data_start_index(rows: &[Row], max_header_rows: usize) -> usize {
    header_row_indices(rows, max_header_rows)
        .last()
        .map(|last| last + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Row> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_single_row_headers_unchanged() {
        let r = rows(&[&["A", "B", "C"]]);
        assert_eq!(derive_leaf_headers(&r, DEFAULT_MAX_HEADER_ROWS), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_group_and_subheader_rows() {
        let r = rows(&[
            &["Scope", "", "Spare Part Specification", "", "", "", "", ""],
            &[
                "Line-No.",
                "Unit",
                "PSP/WBS-No.",
                "SMS Material No.",
                "Description",
                "Type",
                "Additional Explanation",
                "Installed",
            ],
        ]);
        assert_eq!(
            derive_leaf_headers(&r, DEFAULT_MAX_HEADER_ROWS),
            vec![
                "Line-No.",
                "Unit",
                "PSP/WBS-No.",
                "SMS Material No.",
                "Description",
                "Type",
                "Additional Explanation",
                "Installed"
            ]
        );
    }

    #[test]
    fn test_group_label_fills_blank_subheader() {
        let r = rows(&[&["Group A", "Group A", "Group B"], &["Sub A1", "", "Sub B1"]]);
        assert_eq!(
            derive_leaf_headers(&r, DEFAULT_MAX_HEADER_ROWS),
            vec!["Sub A1", "Group A", "Sub B1"]
        );
    }

    #[test]
    fn test_empty_header_fallback() {
        let r = rows(&[&["", "", ""]]);
        assert_eq!(
            derive_leaf_headers(&r, DEFAULT_MAX_HEADER_ROWS),
            vec!["Column 1", "Column 2", "Column 3"]
        );
    }

    #[test]
    fn test_data_rows_rejected() {
        let r = rows(&[
            &["Header A", "Header B"],
            &["A0479.ME09.1100", "09/10.1100.5"],
            &["AMX board", "Widget"],
        ]);
        assert_eq!(detect_header_rows(&r, DEFAULT_MAX_HEADER_ROWS).len(), 1);
        assert_eq!(derive_leaf_headers(&r, DEFAULT_MAX_HEADER_ROWS), vec!["Header A", "Header B"]);
        assert_eq!(data_start_index(&r, DEFAULT_MAX_HEADER_ROWS), 1);
    }

    #[test]
    fn test_manual_header_row_ceiling() {
        let r = rows(&[
            &["Group", "Group", "Group"],
            &["Sub A", "Sub B", "Sub C"],
            &["A0479.ME09.1100", "09/10.1100.5", "AMX board"],
        ]);
        assert_eq!(detect_header_rows(&r, 1), rows(&[&["Group", "Group", "Group"]]));
        assert_eq!(derive_leaf_headers(&r, 1), vec!["Group", "Group", "Group"]);
        assert_eq!(derive_leaf_headers(&r, DEFAULT_MAX_HEADER_ROWS), vec!["Sub A", "Sub B", "Sub C"]);
    }

    #[test]
    fn test_blank_rows_do_not_break_scan() {
        let r = rows(&[&["Group", ""], &["", ""], &["Name", "Qty"], &["1.5/2", "3.0/4"]]);
        assert_eq!(header_row_indices(&r, DEFAULT_MAX_HEADER_ROWS), vec![0, 2]);
        assert_eq!(data_start_index(&r, DEFAULT_MAX_HEADER_ROWS), 3);
    }

    #[test]
    fn test_header_cell_rules() {
        assert!(is_header_cell("Line-No."));
        assert!(is_header_cell("PSP/WBS-No."));
        assert!(!is_header_cell("   "));
        assert!(!is_header_cell("12345"));
        assert!(!is_header_cell("09/10.1100.5"));
        assert!(!is_header_cell("a#b$c%d!"));
        assert!(!is_header_cell(&"x".repeat(101)));
    }

    #[test]
    fn test_no_rows() {
        assert!(detect_header_rows(&[], DEFAULT_MAX_HEADER_ROWS).is_empty());
        assert!(derive_leaf_headers(&[], DEFAULT_MAX_HEADER_ROWS).is_empty());
        assert_eq!(data_start_index(&[], DEFAULT_MAX_HEADER_ROWS), 0);
    }
}
