//! Domain models shared by the transformation pipeline.
//!
//! This module contains the core data structures used throughout the pipeline:
//!
//! - [`SourceColumn`] - A column of the uploaded sheet, addressed by position
//! - [`TargetColumn`] - An output column built from mapped source columns
//! - [`BaseRule`] / [`CombineRule`] - Base-specific cross-row composition
//! - [`PivotColumnDef`] / [`PivotMethod`] - Synthesized pivot columns
//! - [`ProjectStats`] - Per-run summary persisted with projects
//!
//! Rows are plain `Vec<String>`; their position matters both as column index
//! and as row order, so they always travel in a contiguous `Vec`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// One spreadsheet row. Cell `i` belongs to the source column at index `i`.
pub type Row = Vec<String>;

/// A row keyed by column id (as produced when pivot columns are merged).
pub type RowObject = Map<String, Value>;

/// Target id -> allowed base labels.
pub type ColumnGroups = BTreeMap<String, Vec<String>>;

/// Target id -> allowed pivot group names.
pub type GroupAssignments = BTreeMap<String, Vec<String>>;

/// Base label -> rule.
pub type BaseRules = HashMap<String, BaseRule>;

// =============================================================================
// Columns
// =============================================================================

/// Declared type of a source column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    String,
    Number,
    Date,
    Boolean,
}

/// A column of the raw sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceColumn {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
}

impl SourceColumn {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            column_type: ColumnType::String,
        }
    }

    pub fn with_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = column_type;
        self
    }
}

/// An output column.
///
/// Backend-sourced data may omit `mappedColumns` or `delimiter`; both
/// default safely (empty list, single space).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetColumn {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mapped_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_value: Option<String>,
}

impl TargetColumn {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mapped_columns: Vec::new(),
            delimiter: None,
            static_value: None,
        }
    }

    pub fn mapped(mut self, ids: &[&str]) -> Self {
        self.mapped_columns = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    /// Join delimiter; unset or empty falls back to a single space.
    pub fn join_delimiter(&self) -> &str {
        match self.delimiter.as_deref() {
            Some(d) if !d.is_empty() => d,
            _ => " ",
        }
    }

    /// Append a source id unless already mapped.
    pub fn attach(&mut self, source_id: &str) -> bool {
        if self.mapped_columns.iter().any(|c| c == source_id) {
            return false;
        }
        self.mapped_columns.push(source_id.to_string());
        true
    }
}

/// A column of a transformed table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub id: String,
    pub name: String,
}

impl OutputColumn {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

// =============================================================================
// Base rules
// =============================================================================

/// Rules applied to rows of one base label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseRule {
    /// Static values added to a target (matched by name or id).
    #[serde(default)]
    pub add_columns: Vec<StaticColumn>,

    /// Cross-row composition rules. A single object is accepted as a one-item list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub combine: Vec<CombineRule>,
}

/// A static value contributed to a target by a base rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticColumn {
    pub name: String,
    pub value: String,
}

/// Concatenate named columns of a related row into a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombineRule {
    /// Source column names or ids.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Target column name or id.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    /// "self", "Equipment" or "Assembly".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl CombineRule {
    /// Delimiter, defaulting to `|`.
    pub fn join_delimiter(&self) -> &str {
        match self.delimiter.as_deref() {
            Some(d) if !d.is_empty() => d,
            _ => "|",
        }
    }

    /// Base whose nearest previous row supplies the values, or `None` for the row itself.
    pub fn ancestor_base(&self) -> Option<&'static str> {
        match self.source.as_deref().map(|s| s.trim().to_lowercase()) {
            Some(s) if s == "equipment" => Some("equipment"),
            Some(s) if s == "assembly" => Some("assembly"),
            _ => None,
        }
    }

    pub fn targets(&self, target: &TargetColumn) -> bool {
        self.target == target.name || self.target == target.id
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<CombineRule>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<CombineRule>),
        One(CombineRule),
        Null,
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(rule) => vec![rule],
        OneOrMany::Many(rules) => rules,
        OneOrMany::Null => Vec::new(),
    })
}

// =============================================================================
// Pivot
// =============================================================================

/// How a pivot cell picks its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotMethod {
    /// The row's own value, when its group matches.
    #[serde(rename = "self")]
    SameRow,
    /// The nearest upward row with a non-empty value, when its group matches.
    Previous,
    /// The first downward row of the group.
    After,
    /// The nearest upward row whose group equals the parent label.
    Parent,
}

impl PivotMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PivotMethod::SameRow => "self",
            PivotMethod::Previous => "previous",
            PivotMethod::After => "after",
            PivotMethod::Parent => "parent",
        }
    }
}

impl fmt::Display for PivotMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PivotMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "self" => Ok(PivotMethod::SameRow),
            "previous" => Ok(PivotMethod::Previous),
            "after" => Ok(PivotMethod::After),
            "parent" => Ok(PivotMethod::Parent),
            other => Err(format!("unknown pivot method '{}'", other)),
        }
    }
}

/// A synthesized source column, one per distinct group value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotColumnDef {
    pub id: String,
    pub name: String,
}

impl From<&PivotColumnDef> for SourceColumn {
    fn from(def: &PivotColumnDef) -> Self {
        SourceColumn::new(def.id.clone(), def.name.clone())
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Summary of one transform run, stored on projects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub columns_mapped: usize,
    pub rules_applied: usize,
    pub rows_processed: usize,
    pub errors_fixed: usize,
}

/// Stringify a JSON cell the way row objects are read everywhere.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Cell at `idx`, or `""` past the end of a short row.
pub fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_defaults_when_fields_missing() {
        let target: TargetColumn = serde_json::from_value(json!({ "id": "t1", "name": "Part" })).unwrap();
        assert!(target.mapped_columns.is_empty());
        assert_eq!(target.join_delimiter(), " ");

        let empty: TargetColumn =
            serde_json::from_value(json!({ "id": "t1", "name": "Part", "delimiter": "" })).unwrap();
        assert_eq!(empty.join_delimiter(), " ");
    }

    #[test]
    fn test_attach_is_deduplicated() {
        let mut target = TargetColumn::new("t1", "Part").mapped(&["s1"]);
        assert!(target.attach("pivot_spare"));
        assert!(!target.attach("pivot_spare"));
        assert!(!target.attach("s1"));
        assert_eq!(target.mapped_columns, vec!["s1", "pivot_spare"]);
    }

    #[test]
    fn test_combine_accepts_single_object() {
        let rule: BaseRule = serde_json::from_value(json!({
            "combine": { "columns": ["Desc"], "target": "Part", "source": "Equipment" }
        }))
        .unwrap();
        assert_eq!(rule.combine.len(), 1);
        assert_eq!(rule.combine[0].ancestor_base(), Some("equipment"));
        assert_eq!(rule.combine[0].join_delimiter(), "|");
    }

    #[test]
    fn test_combine_source_defaults_to_self() {
        let rule = CombineRule {
            columns: vec![],
            target: "t".into(),
            delimiter: None,
            source: Some("self".into()),
        };
        assert_eq!(rule.ancestor_base(), None);
    }

    #[test]
    fn test_pivot_method_serde_names() {
        assert_eq!(serde_json::to_value(PivotMethod::SameRow).unwrap(), json!("self"));
        let m: PivotMethod = serde_json::from_value(json!("parent")).unwrap();
        assert_eq!(m, PivotMethod::Parent);
        assert_eq!("After".parse::<PivotMethod>().unwrap(), PivotMethod::After);
        assert!("sideways".parse::<PivotMethod>().is_err());
    }

    #[test]
    fn test_source_column_type_field() {
        let col: SourceColumn = serde_json::from_value(json!({ "id": "s1", "name": "Qty", "type": "number" })).unwrap();
        assert_eq!(col.column_type, ColumnType::Number);
        let untyped: SourceColumn = serde_json::from_value(json!({ "id": "s1", "name": "Qty" })).unwrap();
        assert_eq!(untyped.column_type, ColumnType::String);
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&json!(null)), "");
        assert_eq!(cell_text(&json!(3)), "3");
        assert_eq!(cell_text(&json!("x")), "x");
    }
}
