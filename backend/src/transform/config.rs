//! Transform configuration documents.
//!
//! A configuration is everything the engine needs besides the sheet itself:
//! targets and their mappings, base rules, group restrictions, pivot
//! methods and output order. Documents are schema-checked before serde sees
//! them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{BaseRules, ColumnGroups, GroupAssignments, PivotMethod, Row, SourceColumn, TargetColumn};
use crate::transform::engine::TransformPayload;
use crate::validation::validate_transform_config;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfig {
    pub target_columns: Vec<TargetColumn>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mapping: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub base_rules: BaseRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_order: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_groups: Option<ColumnGroups>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_methods: Option<BTreeMap<String, PivotMethod>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_base_column: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_preferred_base: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot_group_assignments: Option<GroupAssignments>,
    /// Ceiling on detected header rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_rows: Option<usize>,
}

impl TransformConfig {
    /// Validate against the embedded schema, then deserialize.
    pub fn from_value(value: Value) -> PipelineResult<Self> {
        validate_transform_config(&value).map_err(PipelineError::InvalidConfig)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json_str(content: &str) -> PipelineResult<Self> {
        Self::from_value(serde_json::from_str(content)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Whether any target uses the pivot stage.
    pub fn has_pivots(&self) -> bool {
        self.column_methods.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// Copy whose column references are source ids.
    ///
    /// Configs written by hand may name source columns by header instead of
    /// id. Each reference is matched by id, then exact name, then
    /// case-insensitive name; unknown references are left as they are.
    pub fn resolve_against(&self, source_columns: &[SourceColumn]) -> Self {
        let mut resolved = self.clone();
        for target in &mut resolved.target_columns {
            for id in &mut target.mapped_columns {
                *id = resolve_column_ref(source_columns, id);
            }
        }
        if let Some(map) = &mut resolved.column_base_column {
            for id in map.values_mut() {
                *id = resolve_column_ref(source_columns, id);
            }
        }
        resolved
    }

    /// Engine input for `rows` under this configuration.
    pub fn payload(&self, rows: Vec<Row>, source_columns: Vec<SourceColumn>) -> TransformPayload {
        TransformPayload {
            rows,
            source_columns,
            target_columns: self.target_columns.clone(),
            mapping: self.mapping.clone(),
            base_rules: self.base_rules.clone(),
            output_order: self.output_order.clone(),
            column_groups: self.column_groups.clone(),
            column_methods: self.column_methods.clone(),
            column_base_column: self.column_base_column.clone(),
        }
    }

    /// Count of base-rule entries (combine and added columns).
    pub fn rule_count(&self) -> usize {
        self.base_rules
            .values()
            .map(|r| r.combine.len() + r.add_columns.len())
            .sum()
    }
}

fn resolve_column_ref(source_columns: &[SourceColumn], reference: &str) -> String {
    source_columns
        .iter()
        .find(|c| c.id == reference)
        .or_else(|| source_columns.iter().find(|c| c.name == reference))
        .or_else(|| {
            source_columns
                .iter()
                .find(|c| c.name.to_lowercase() == reference.to_lowercase())
        })
        .map(|c| c.id.clone())
        .unwrap_or_else(|| reference.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_valid_config() {
        let config = TransformConfig::from_value(json!({
            "targetColumns": [{ "id": "t1", "name": "Part", "mappedColumns": ["Item"] }],
            "baseRules": { "Assembly": { "combine": { "columns": ["Desc"], "target": "Part" } } },
            "columnMethods": { "t1": "after" },
            "headerRows": 2
        }))
        .unwrap();

        assert_eq!(config.header_rows, Some(2));
        assert!(config.has_pivots());
        assert_eq!(config.rule_count(), 1);
    }

    #[test]
    fn test_invalid_config_lists_errors() {
        let err = TransformConfig::from_value(json!({ "targetColumns": "nope" })).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(ref errors) if !errors.is_empty()));
    }

    #[test]
    fn test_resolve_names_to_ids() {
        let mut config = TransformConfig {
            target_columns: vec![TargetColumn::new("t1", "Part").mapped(&["item id", "s3", "Missing"])],
            ..Default::default()
        };
        config.column_base_column = Some([("t1".to_string(), "Base".to_string())].into_iter().collect());

        let sources = vec![
            SourceColumn::new("s1", "Item ID"),
            SourceColumn::new("s2", "Base"),
            SourceColumn::new("s3", "Desc"),
        ];
        let resolved = config.resolve_against(&sources);

        assert_eq!(resolved.target_columns[0].mapped_columns, vec!["s1", "s3", "Missing"]);
        assert_eq!(resolved.column_base_column.unwrap()["t1"], "s2");
    }
}
