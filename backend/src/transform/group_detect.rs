//! Heuristic choice of the category/base column.

use crate::models::{cell, Row, SourceColumn};
use std::collections::HashSet;

/// Column names that announce a category column.
const PREFERRED_NAMES: &[&str] = &["base", "category", "type", "row type", "row_type", "group"];

/// Column names that usually hold identifiers.
const IDENTIFIER_NAMES: &[&str] = &["item", "id"];

const MAX_GROUP_CARDINALITY: usize = 10;
const CARDINALITY_SCAN_CAP: usize = 50;

/// Index of the column most likely to hold row categories.
///
/// Tried in order, always skipping `exclude`:
/// 1. a column whose name contains a category-like word;
/// 2. a low-cardinality column (1..=10 distinct values) not named like an identifier;
/// 3. any low-cardinality column.
///
/// `None` is a normal outcome (nothing qualifies, or no input).
pub fn detect_group_column_index(
    rows: &[Row],
    source_columns: &[SourceColumn],
    exclude: Option<usize>,
) -> Option<usize> {
    if rows.is_empty() || source_columns.is_empty() {
        return None;
    }

    let candidates = || (0..source_columns.len()).filter(move |&i| Some(i) != exclude);
    let name_of = |i: usize| source_columns[i].name.to_lowercase();
    let low_cardinality = |i: usize| {
        let uc = unique_count(rows, i);
        uc > 0 && uc <= MAX_GROUP_CARDINALITY
    };

    if let Some(i) = candidates().find(|&i| {
        let name = name_of(i);
        PREFERRED_NAMES.iter().any(|p| name.contains(p))
    }) {
        return Some(i);
    }

    if let Some(i) = candidates().find(|&i| {
        let name = name_of(i);
        !IDENTIFIER_NAMES.iter().any(|a| name.contains(a)) && low_cardinality(i)
    }) {
        return Some(i);
    }

    candidates().find(|&i| low_cardinality(i))
}

/// Distinct raw cell values in column `idx`, giving up past the scan cap.
fn unique_count(rows: &[Row], idx: usize) -> usize {
    let mut seen = HashSet::new();
    for row in rows {
        seen.insert(cell(row, idx));
        if seen.len() > CARDINALITY_SCAN_CAP {
            break;
        }
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Row> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn cols(names: &[&str]) -> Vec<SourceColumn> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| SourceColumn::new(format!("c{}", i + 1), *n))
            .collect()
    }

    #[test]
    fn test_prefers_category_name() {
        let r = rows(&[&["A", "Equipment", "EQ1"], &["B", "Spare", "SP1"]]);
        let c = cols(&["Item", "Category", "Value"]);
        assert_eq!(detect_group_column_index(&r, &c, None), Some(1));
    }

    #[test]
    fn test_category_beats_earlier_low_cardinality_column() {
        let r = rows(&[&["X", "Equipment"], &["X", "Spare"], &["Y", "Spare"]]);
        let c = cols(&["Flag", "Category"]);
        assert_eq!(detect_group_column_index(&r, &c, None), Some(1));
    }

    #[test]
    fn test_low_cardinality_avoids_identifiers() {
        let r = rows(&[&["A", "X", "1"], &["B", "X", "2"], &["C", "Y", "3"]]);
        let c = cols(&["Item", "Kind", "Value"]);
        assert_eq!(detect_group_column_index(&r, &c, None), Some(1));
    }

    #[test]
    fn test_excluded_index_is_skipped() {
        let r = rows(&[&["A", "X", "1"], &["B", "X", "2"]]);
        let c = cols(&["Item", "Group", "Value"]);
        assert_eq!(detect_group_column_index(&r, &c, Some(1)), Some(2));
    }

    #[test]
    fn test_identifier_fallback() {
        let r = rows(&[&["A1"], &["A2"]]);
        let c = cols(&["Item ID"]);
        assert_eq!(detect_group_column_index(&r, &c, None), Some(0));
    }

    #[test]
    fn test_high_cardinality_rejected() {
        let r: Vec<Row> = (0..60).map(|i| vec![format!("P{}", i)]).collect();
        let c = cols(&["Part"]);
        assert_eq!(detect_group_column_index(&r, &c, None), None);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(detect_group_column_index(&[], &[], None), None);
        assert_eq!(detect_group_column_index(&rows(&[&["a"]]), &[], None), None);
    }
}
