//! Final table transform: mapping, base rules, row filtering and column assembly.
//!
//! Rows are classified by their `Base` cell (see [`normalize_base`]). The
//! output keeps only Assembly and Spare rows, one column per target plus the
//! trailing `Base` and `Custom` columns. An assembly with no spare before the
//! next assembly is flagged `"No Spare"` in `Custom`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{TransformError, TransformResult};
use crate::models::{
    cell, BaseRule, BaseRules, ColumnGroups, CombineRule, OutputColumn, PivotMethod, Row, SourceColumn,
    TargetColumn,
};
use crate::transform::base::{is_assembly_or_spare, normalize_base, ASSEMBLY, SPARE};

pub const BASE_COLUMN: &str = "Base";
pub const CUSTOM_COLUMN: &str = "Custom";
pub const NO_SPARE: &str = "No Spare";

/// Everything [`transform_excel_data`] reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformPayload {
    pub rows: Vec<Row>,
    pub source_columns: Vec<SourceColumn>,
    pub target_columns: Vec<TargetColumn>,
    /// Source id -> target name. Informational; targets carry their own mapping.
    #[serde(default)]
    pub mapping: HashMap<String, String>,
    #[serde(default)]
    pub base_rules: BaseRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_order: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_groups: Option<ColumnGroups>,
    /// Consumed by the pivot stage, carried through unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_methods: Option<BTreeMap<String, PivotMethod>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_base_column: Option<BTreeMap<String, String>>,
}

/// Output of [`transform_excel_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformedTable {
    pub rows: Vec<Row>,
    pub columns: Vec<OutputColumn>,
    pub base_column_index: usize,
}

impl TransformedTable {
    pub fn column_index(&self, id: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }
}

/// Run the full transform over `payload`.
///
/// Fails only when no source column is named `Base` (case-insensitive).
pub fn transform_excel_data(payload: &TransformPayload) -> TransformResult<TransformedTable> {
    let TransformPayload {
        rows,
        source_columns,
        target_columns,
        base_rules,
        output_order,
        column_groups,
        ..
    } = payload;

    let base_idx = source_columns
        .iter()
        .position(|c| c.name.to_lowercase() == "base")
        .ok_or(TransformError::MissingBaseColumn)?;

    let no_spare = assemblies_without_spares(rows, base_idx);
    let empty_groups = ColumnGroups::new();
    let groups = column_groups.as_ref().unwrap_or(&empty_groups);

    let selected_bases: HashSet<String> = groups.values().flatten().map(|g| normalize_base(g)).collect();
    let any_restriction = groups.values().any(|g| !g.is_empty());

    let source_index: HashMap<&str, usize> = source_columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut kept: Vec<(Row, usize)> = Vec::new();

    for (row_idx, row) in rows.iter().enumerate() {
        let base_raw = cell(row, base_idx);
        let base_norm = normalize_base(base_raw);

        if !selected_bases.is_empty() && !selected_bases.contains(&base_norm) {
            continue;
        }

        let rule = base_rules.get(base_raw).or_else(|| base_rules.get(&base_norm));
        let mut out_row = Vec::with_capacity(target_columns.len() + 2);
        let mut include = false;

        for target in target_columns {
            let mut values: Vec<String> = target
                .mapped_columns
                .iter()
                .filter_map(|id| source_index.get(id.as_str()))
                .map(|&i| cell(row, i).trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();

            if let Some(rule) = rule {
                values.extend(rule_values(rule, target, rows, row_idx, base_idx, source_columns));
            }

            let delimiter = if target.mapped_columns.is_empty() { "|" } else { " " };
            let joined = values.join(delimiter);

            if !joined.is_empty() {
                include |= match groups.get(&target.id).filter(|g| !g.is_empty()) {
                    Some(allowed) => allowed.iter().any(|g| normalize_base(g) == base_norm),
                    None => !any_restriction,
                };
            }

            out_row.push(with_static_value(joined, target));
        }

        if include {
            kept.push((out_row, row_idx));
        }
    }

    let mut columns: Vec<OutputColumn> = target_columns
        .iter()
        .map(|t| OutputColumn::new(t.id.clone(), t.name.clone()))
        .collect();
    let base_col = columns.len();
    columns.push(OutputColumn::new(BASE_COLUMN, BASE_COLUMN));
    let custom_col = columns.len();
    columns.push(OutputColumn::new(CUSTOM_COLUMN, CUSTOM_COLUMN));

    let out_rows: Vec<Row> = kept
        .into_iter()
        .filter(|(_, src)| is_assembly_or_spare(cell(&rows[*src], base_idx)))
        .map(|(mut out, src)| {
            out.push(cell(&rows[src], base_idx).to_string());
            out.push(if no_spare.contains(&src) { NO_SPARE.to_string() } else { String::new() });
            out
        })
        .collect();

    match output_order.as_deref().filter(|o| !o.is_empty()) {
        Some(order) => Ok(reorder(columns, out_rows, order, base_col, custom_col)),
        None => Ok(TransformedTable {
            rows: out_rows,
            columns,
            base_column_index: base_col,
        }),
    }
}

/// Values a base rule contributes to `target` for the row at `row_idx`.
fn rule_values(
    rule: &BaseRule,
    target: &TargetColumn,
    rows: &[Row],
    row_idx: usize,
    base_idx: usize,
    source_columns: &[SourceColumn],
) -> Vec<String> {
    let mut values = Vec::new();

    for combine in rule.combine.iter().filter(|c| c.targets(target)) {
        let src_idx = combine_source_row(combine, rows, row_idx, base_idx);
        let parts: Vec<String> = combine
            .columns
            .iter()
            .filter_map(|col| source_columns.iter().position(|c| &c.name == col || &c.id == col))
            .map(|i| cell(&rows[src_idx], i).trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if !parts.is_empty() {
            values.push(parts.join(combine.join_delimiter()));
        }
    }

    for added in &rule.add_columns {
        if (added.name == target.name || added.name == target.id) && !added.value.is_empty() {
            values.push(added.value.clone());
        }
    }

    values
}

/// Row a combine rule reads from: the nearest previous row of its ancestor base, else the row itself.
fn combine_source_row(combine: &CombineRule, rows: &[Row], row_idx: usize, base_idx: usize) -> usize {
    combine
        .ancestor_base()
        .and_then(|wanted| find_parent_row(rows, base_idx, row_idx, wanted))
        .unwrap_or(row_idx)
}

fn find_parent_row(rows: &[Row], base_idx: usize, row_idx: usize, wanted: &str) -> Option<usize> {
    (0..row_idx).rev().find(|&i| {
        let v = cell(&rows[i], base_idx);
        !v.is_empty() && normalize_base(v) == wanted
    })
}

/// Assembly rows with no spare between them and the next assembly.
fn assemblies_without_spares(rows: &[Row], base_idx: usize) -> HashSet<usize> {
    let bases: Vec<String> = rows.iter().map(|r| normalize_base(cell(r, base_idx))).collect();
    let assemblies: Vec<usize> = (0..bases.len()).filter(|&i| bases[i] == ASSEMBLY).collect();

    assemblies
        .iter()
        .enumerate()
        .filter(|&(k, &start)| {
            let end = assemblies.get(k + 1).copied().unwrap_or(rows.len());
            !bases[start + 1..end].iter().any(|b| b == SPARE)
        })
        .map(|(_, &start)| start)
        .collect()
}

fn with_static_value(value: String, target: &TargetColumn) -> String {
    match target.static_value.as_deref() {
        Some(s) if !s.is_empty() && value.is_empty() => s.to_string(),
        Some(s) if !s.is_empty() => format!("{}{}{}", value, target.join_delimiter(), s),
        _ => value,
    }
}

/// Reorder columns (and rows with them) by name or id; `Base` and `Custom` always survive.
fn reorder(
    columns: Vec<OutputColumn>,
    rows: Vec<Row>,
    order: &[String],
    base_col: usize,
    custom_col: usize,
) -> TransformedTable {
    let mut indices: Vec<usize> = order
        .iter()
        .filter_map(|key| columns.iter().position(|c| &c.name == key || &c.id == key))
        .collect();
    for required in [base_col, custom_col] {
        if !indices.contains(&required) {
            indices.push(required);
        }
    }

    let columns: Vec<OutputColumn> = indices.iter().map(|&i| columns[i].clone()).collect();
    let rows = rows
        .iter()
        .map(|r| indices.iter().map(|&i| cell(r, i).to_string()).collect())
        .collect();
    let base_column_index = columns.iter().position(|c| c.id == BASE_COLUMN).unwrap_or(base_col);

    TransformedTable {
        rows,
        columns,
        base_column_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(data: &[&[&str]]) -> Vec<Row> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn sources() -> Vec<SourceColumn> {
        vec![
            SourceColumn::new("s1", "ItemId"),
            SourceColumn::new("s2", "Base"),
            SourceColumn::new("s3", "Desc"),
        ]
    }

    fn payload(data: &[&[&str]], targets: Vec<TargetColumn>) -> TransformPayload {
        TransformPayload {
            rows: rows(data),
            source_columns: sources(),
            target_columns: targets,
            ..Default::default()
        }
    }

    fn groups(pairs: &[(&str, &[&str])]) -> Option<ColumnGroups> {
        Some(
            pairs
                .iter()
                .map(|(t, g)| (t.to_string(), g.iter().map(|s| s.to_string()).collect()))
                .collect(),
        )
    }

    fn column<'a>(table: &'a TransformedTable, id: &str) -> Vec<&'a str> {
        let idx = table.column_index(id).unwrap();
        table.rows.iter().map(|r| r[idx].as_str()).collect()
    }

    #[test]
    fn test_maps_columns() {
        let p = payload(
            &[&["Item-001", "Assembly", "Widget"], &["Item-002", "Spare", "Gear"]],
            vec![
                TargetColumn::new("t1", "PartID").mapped(&["s1"]),
                TargetColumn::new("t2", "PartDesc").mapped(&["s3"]),
            ],
        );
        let table = transform_excel_data(&p).unwrap();
        let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["PartID", "PartDesc", "Base", "Custom"]);
        assert_eq!(table.rows[0], vec!["Item-001", "Widget", "Assembly", ""]);
        assert_eq!(table.base_column_index, 2);
    }

    #[test]
    fn test_hard_category_filter() {
        let mut p = payload(
            &[&["A", "Assembly", "Widget"], &["B", "Spare", "Gear"], &["C", "Equipment", "Motor"]],
            vec![
                TargetColumn::new("t1", "PartA").mapped(&["s3"]),
                TargetColumn::new("t2", "PartB").mapped(&["s1"]),
            ],
        );
        p.column_groups = groups(&[("t1", &["Assembly", "Spare", "Equipment"])]);
        let table = transform_excel_data(&p).unwrap();
        assert_eq!(column(&table, "Base"), vec!["Assembly", "Spare"]);
    }

    #[test]
    fn test_unrestricted_targets_do_not_count_when_any_target_is_restricted() {
        let mut p = payload(
            &[&["item1", "Assembly", "Xdesc"], &["item2", "Spare", ""], &["item3", "Equipment", "Other"]],
            vec![
                TargetColumn::new("t1", "Desc").mapped(&["s3"]),
                TargetColumn::new("t2", "Part").mapped(&["s1"]),
            ],
        );
        p.column_groups = groups(&[("t2", &["Spare"])]);
        let table = transform_excel_data(&p).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(column(&table, "Base"), vec!["Spare"]);
    }

    #[test]
    fn test_restricted_target_needs_a_value() {
        let mut p = payload(
            &[&["", "Spare", "Gear"], &["B", "Spare", ""]],
            vec![
                TargetColumn::new("t1", "Desc").mapped(&["s3"]),
                TargetColumn::new("t2", "Part").mapped(&["s1"]),
            ],
        );
        p.column_groups = groups(&[("t2", &["Spare"]), ("t1", &[])]);
        let table = transform_excel_data(&p).unwrap();
        assert_eq!(column(&table, "t2"), vec!["B"]);
    }

    #[test]
    fn test_assemblies_without_spares() {
        let p = payload(
            &[&["A", "Assembly", "Widget A"], &["B", "Spare", "Spare 1"], &["C", "Assembly", "Widget B"]],
            vec![TargetColumn::new("t1", "Part").mapped(&["s1"])],
        );
        let table = transform_excel_data(&p).unwrap();
        assert_eq!(column(&table, "Custom"), vec!["", "", NO_SPARE]);
    }

    #[test]
    fn test_missing_base_column() {
        let mut p = payload(&[&["A", "Assembly", "x"]], vec![TargetColumn::new("t1", "Part").mapped(&["s1"])]);
        p.source_columns[1].name = "Kind".into();
        assert!(matches!(transform_excel_data(&p), Err(TransformError::MissingBaseColumn)));
    }

    #[test]
    fn test_base_column_name_is_case_insensitive() {
        let mut p = payload(&[&["A", "Assembly", "x"]], vec![TargetColumn::new("t1", "Part").mapped(&["s1"])]);
        p.source_columns[1].name = "BASE".into();
        assert_eq!(transform_excel_data(&p).unwrap().rows.len(), 1);
    }

    #[test]
    fn test_combine_from_previous_equipment() {
        let mut p = payload(
            &[
                &["EQ-1", "Equipment", "Pump"],
                &["AS-1", "Assembly", "Seal kit"],
                &["SP-1", "Spare", "O-ring"],
            ],
            vec![TargetColumn::new("t1", "Part").mapped(&["s1"])],
        );
        p.base_rules = serde_json::from_value(json!({
            "Assembly": { "combine": { "columns": ["ItemId", "s3"], "target": "Part", "source": "Equipment", "delimiter": "/" } },
            "spare": { "combine": [{ "columns": ["Desc"], "target": "t1" }] }
        }))
        .unwrap();
        let table = transform_excel_data(&p).unwrap();
        assert_eq!(column(&table, "t1"), vec!["AS-1 EQ-1/Pump", "SP-1 O-ring"]);
    }

    #[test]
    fn test_combine_without_ancestor_uses_own_row() {
        let mut p = payload(&[&["AS-1", "Assembly", "Seal kit"]], vec![TargetColumn::new("t1", "Part")]);
        p.base_rules = serde_json::from_value(json!({
            "assembly": { "combine": { "columns": ["ItemId", "Desc"], "target": "Part", "source": "Equipment" } }
        }))
        .unwrap();
        let table = transform_excel_data(&p).unwrap();
        assert_eq!(column(&table, "t1"), vec!["AS-1|Seal kit"]);
    }

    #[test]
    fn test_selected_bases_prefilter() {
        let mut p = payload(
            &[&["A", "Assembly", "x"], &["B", "Spare", "y"]],
            vec![
                TargetColumn::new("t1", "Part").mapped(&["s1"]),
                TargetColumn::new("t2", "Desc").mapped(&["s3"]),
            ],
        );
        p.column_groups = groups(&[("t1", &["Assembly"])]);
        let table = transform_excel_data(&p).unwrap();
        assert_eq!(column(&table, "Base"), vec!["Assembly"]);
    }

    #[test]
    fn test_output_order() {
        let mut p = payload(
            &[&["A", "Assembly", "Widget"]],
            vec![
                TargetColumn::new("t1", "PartID").mapped(&["s1"]),
                TargetColumn::new("t2", "PartDesc").mapped(&["s3"]),
            ],
        );
        p.output_order = Some(vec!["Base".into(), "t2".into(), "Unknown".into()]);
        let table = transform_excel_data(&p).unwrap();
        let ids: Vec<_> = table.columns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["Base", "t2", "Custom"]);
        assert_eq!(table.rows[0], vec!["Assembly", "Widget", ""]);
        assert_eq!(table.base_column_index, 0);
    }

    #[test]
    fn test_static_value_and_added_columns() {
        let mut target = TargetColumn::new("t1", "Part").mapped(&["s1"]).with_delimiter("-");
        target.static_value = Some("X".into());
        let mut p = payload(&[&["A", "Assembly", ""], &["", "Spare", ""]], vec![target]);
        p.base_rules = serde_json::from_value(json!({
            "Spare": { "addColumns": [{ "name": "Part", "value": "SP" }] }
        }))
        .unwrap();
        let table = transform_excel_data(&p).unwrap();
        assert_eq!(column(&table, "t1"), vec!["A-X", "SP-X"]);
    }

    #[test]
    fn test_empty_target_cannot_include_row() {
        let p = payload(&[&["A", "Assembly", "x"]], vec![TargetColumn::new("t1", "Nothing")]);
        assert!(transform_excel_data(&p).unwrap().rows.is_empty());
    }
}
