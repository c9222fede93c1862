//! Row pivot: one new column per distinct group value.

use crate::models::{cell, PivotColumnDef, PivotMethod, Row};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Output of [`pivot_by_group`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotResult {
    /// Distinct trimmed group values, first-seen order.
    pub new_columns: Vec<String>,
    /// Input rows, each extended by one cell per new column.
    pub transformed_rows: Vec<Row>,
}

/// Pivot `value_col` across the distinct values of `group_col`.
///
/// `parent_label` is only read by [`PivotMethod::Parent`]; without it every
/// pivot cell stays empty.
pub fn pivot_by_group(
    rows: &[Row],
    group_col: usize,
    value_col: usize,
    method: PivotMethod,
    parent_label: Option<&str>,
) -> PivotResult {
    if rows.is_empty() {
        return PivotResult {
            new_columns: Vec::new(),
            transformed_rows: Vec::new(),
        };
    }

    let group = |r: &Row| cell(r, group_col).trim().to_string();
    let value = |r: &Row| cell(r, value_col).to_string();

    let mut seen = HashSet::new();
    let new_columns: Vec<String> = rows
        .iter()
        .map(group)
        .filter(|g| !g.is_empty() && seen.insert(g.clone()))
        .collect();

    let transformed_rows = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let mut out = row.clone();
            for g in &new_columns {
                let v = match method {
                    PivotMethod::SameRow => {
                        if &group(row) == g {
                            value(row)
                        } else {
                            String::new()
                        }
                    }
                    // Stops at the first non-empty value above, matching or not
                    PivotMethod::Previous => rows[..idx]
                        .iter()
                        .rev()
                        .find(|p| !cell(p, value_col).is_empty())
                        .filter(|p| &group(*p) == g)
                        .map(value)
                        .unwrap_or_default(),
                    PivotMethod::After => rows[idx + 1..]
                        .iter()
                        .find(|n| &group(*n) == g)
                        .map(value)
                        .unwrap_or_default(),
                    PivotMethod::Parent => parent_label
                        .and_then(|label| rows[..idx].iter().rev().find(|p| group(*p) == label))
                        .map(value)
                        .unwrap_or_default(),
                };
                out.push(v);
            }
            out
        })
        .collect();

    PivotResult {
        new_columns,
        transformed_rows,
    }
}

/// Stable id of the pivot column for a group value: `"Spare Part"` → `pivot_spare_part`.
pub fn pivot_column_id(group_value: &str) -> String {
    format!("pivot_{}", WHITESPACE.replace_all(group_value, "_").to_lowercase())
}

/// Column definitions for the new columns of a pivot.
pub fn pivot_column_defs(new_columns: &[String]) -> Vec<PivotColumnDef> {
    new_columns
        .iter()
        .map(|name| PivotColumnDef {
            id: pivot_column_id(name),
            name: name.clone(),
        })
        .collect()
}
