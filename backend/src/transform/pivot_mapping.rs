//! Merge pivot columns into the preview model and map them onto targets.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{cell_text, ColumnGroups, GroupAssignments, PivotColumnDef, PivotMethod, RowObject, SourceColumn};
use crate::session::PreviewData;

/// Assignment state persisted alongside the pivot columns.
///
/// Every field is optional; a `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotAssignments {
    #[serde(default)]
    pub pivot_group_assignments: Option<GroupAssignments>,
    #[serde(default)]
    pub column_groups: Option<ColumnGroups>,
    #[serde(default)]
    pub column_preferred_base: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub column_methods: Option<BTreeMap<String, PivotMethod>>,
    #[serde(default)]
    pub column_base_column: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub mapped_sources: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotApplication {
    pub updated_preview_data: PreviewData,
    /// One object per input row: `id` (1-based) plus one joined value per target id.
    pub transformed_after_rows: Vec<RowObject>,
}

/// Apply pivot-to-target mappings to a copy of `preview`.
///
/// `pivot_mappings` maps pivot column id to target id; an empty target id
/// means unmapped. `before_rows` are keyed by source column id and become the
/// new `rows`, projected onto the extended source column list.
pub fn apply_pivot_mappings_to_preview_data(
    preview: &PreviewData,
    pivot_col_defs: &[PivotColumnDef],
    pivot_mappings: &BTreeMap<String, String>,
    before_rows: &[RowObject],
    assignments: &PivotAssignments,
) -> PivotApplication {
    let mut stored = preview.clone();

    for def in pivot_col_defs {
        if !stored.source_columns.iter().any(|c| c.id == def.id) {
            stored.source_columns.push(SourceColumn::from(def));
        }
    }

    if let Some(v) = &assignments.pivot_group_assignments {
        stored.pivot_group_assignments = Some(v.clone());
    }
    if let Some(v) = &assignments.column_groups {
        stored.column_groups = Some(v.clone());
    }
    if let Some(v) = &assignments.column_preferred_base {
        stored.column_preferred_base = Some(v.clone());
    }
    if let Some(v) = &assignments.column_methods {
        stored.column_methods = Some(v.clone());
    }
    if let Some(v) = &assignments.column_base_column {
        stored.column_base_column = Some(v.clone());
    }
    if let Some(v) = &assignments.mapped_sources {
        stored.mapped_sources = Some(v.clone());
    }

    for (pivot_id, target_id) in ordered_mappings(pivot_col_defs, pivot_mappings) {
        if target_id.is_empty() {
            continue;
        }
        let Some(target) = stored.target_columns.iter_mut().find(|t| &t.id == target_id) else {
            continue;
        };

        if let Some(allowed) = assignments
            .pivot_group_assignments
            .as_ref()
            .and_then(|a| a.get(target_id))
        {
            let Some(def) = pivot_col_defs.iter().find(|p| &p.id == pivot_id) else {
                continue;
            };
            if !allowed.contains(&def.name) {
                continue;
            }
        }

        target.attach(pivot_id);
    }

    stored.rows = before_rows
        .iter()
        .map(|r| {
            stored
                .source_columns
                .iter()
                .map(|c| r.get(&c.id).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    let transformed_after_rows = before_rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut obj = RowObject::new();
            obj.insert("id".to_string(), Value::from(i + 1));
            for target in &stored.target_columns {
                let values: Vec<String> = target
                    .mapped_columns
                    .iter()
                    .filter_map(|id| r.get(id))
                    .filter(|v| !is_falsy(v))
                    .map(cell_text)
                    .filter(|v| !v.is_empty())
                    .collect();
                obj.insert(target.id.clone(), Value::String(values.join(target.join_delimiter())));
            }
            obj
        })
        .collect();

    PivotApplication {
        updated_preview_data: stored,
        transformed_after_rows,
    }
}

/// `null`, `false`, zero and `""` contribute nothing to a joined value.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Mappings in pivot definition order, then any remaining ids.
fn ordered_mappings<'a>(
    defs: &'a [PivotColumnDef],
    mappings: &'a BTreeMap<String, String>,
) -> Vec<(&'a String, &'a String)> {
    let mut ordered: Vec<_> = defs
        .iter()
        .filter_map(|d| mappings.get_key_value(&d.id))
        .collect();
    ordered.extend(
        mappings
            .iter()
            .filter(|(id, _)| !defs.iter().any(|d| &d.id == *id)),
    );
    ordered
}
