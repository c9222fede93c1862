//! Session workspace
//!
//! The mapping screen and the preview screen exchange one serializable
//! bundle, [`PreviewData`]. Updates are applied with [`merge_preview`]:
//! fields present in the update replace the stored value, omitted fields
//! (in particular the assignment maps) are kept.
//!
//! [`SessionStore`] persists the bundles as JSON files under the data dir.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreResult;
use crate::models::{
    cell, ColumnGroups, GroupAssignments, PivotMethod, Row, RowObject, SourceColumn, TargetColumn,
};

/// Key of the preview bundle.
pub const PREVIEW_KEY: &str = "previewData";

/// Key of the mapping bundle.
pub const MAPPING_KEY: &str = "mappingData";

/// The working state shared between mapping and preview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub source_columns: Vec<SourceColumn>,
    #[serde(default)]
    pub target_columns: Vec<TargetColumn>,
    #[serde(default)]
    pub rows: Vec<Row>,

    /// Target id -> allowed base labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_groups: Option<ColumnGroups>,
    /// Target id -> source ids picked on the mapping screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_sources: Option<BTreeMap<String, Vec<String>>>,
    /// Target id -> parent label for the `parent` pivot method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_preferred_base: Option<BTreeMap<String, String>>,
    /// Target id -> pivot method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_methods: Option<BTreeMap<String, PivotMethod>>,
    /// Target id -> source id of the group column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_base_column: Option<BTreeMap<String, String>>,
    /// Target id -> allowed pivot group names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot_group_assignments: Option<GroupAssignments>,

    /// Keys this crate does not interpret, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PreviewData {
    pub fn column_index(&self, id: &str) -> Option<usize> {
        self.source_columns.iter().position(|c| c.id == id)
    }

    pub fn target(&self, id: &str) -> Option<&TargetColumn> {
        self.target_columns.iter().find(|t| t.id == id)
    }

    /// Rows keyed by source column id.
    pub fn row_objects(&self) -> Vec<RowObject> {
        self.rows
            .iter()
            .map(|row| {
                self.source_columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| (col.id.clone(), Value::String(cell(row, i).to_string())))
                    .collect()
            })
            .collect()
    }
}

/// A partial [`PreviewData`]; `None` means "leave as stored".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_columns: Option<Vec<SourceColumn>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_columns: Option<Vec<TargetColumn>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_groups: Option<ColumnGroups>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_sources: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_preferred_base: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_methods: Option<BTreeMap<String, PivotMethod>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_base_column: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pivot_group_assignments: Option<GroupAssignments>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What the mapping screen hands over.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub source_columns: Vec<SourceColumn>,
    #[serde(default)]
    pub target_columns: Vec<TargetColumn>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl From<&MappingData> for PreviewUpdate {
    /// Columns always replace; rows only when the mapping carries any.
    fn from(mapping: &MappingData) -> Self {
        PreviewUpdate {
            file_name: mapping.file_name.clone(),
            source_columns: Some(mapping.source_columns.clone()),
            target_columns: Some(mapping.target_columns.clone()),
            rows: (!mapping.rows.is_empty()).then(|| mapping.rows.clone()),
            ..Default::default()
        }
    }
}

/// Shallow merge: every field set in `update` wins, everything else is kept.
pub fn merge_preview(stored: &PreviewData, update: PreviewUpdate) -> PreviewData {
    let mut merged = stored.clone();

    if let Some(v) = update.file_name {
        merged.file_name = Some(v);
    }
    if let Some(v) = update.source_columns {
        merged.source_columns = v;
    }
    if let Some(v) = update.target_columns {
        merged.target_columns = v;
    }
    if let Some(v) = update.rows {
        merged.rows = v;
    }
    if update.column_groups.is_some() {
        merged.column_groups = update.column_groups;
    }
    if update.mapped_sources.is_some() {
        merged.mapped_sources = update.mapped_sources;
    }
    if update.column_preferred_base.is_some() {
        merged.column_preferred_base = update.column_preferred_base;
    }
    if update.column_methods.is_some() {
        merged.column_methods = update.column_methods;
    }
    if update.column_base_column.is_some() {
        merged.column_base_column = update.column_base_column;
    }
    if update.pivot_group_assignments.is_some() {
        merged.pivot_group_assignments = update.pivot_group_assignments;
    }
    merged.extra.extend(update.extra);

    merged
}

/// File-backed store of the session bundles.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn read<T: for<'de> Deserialize<'de>>(&self, key: &str) -> StoreResult<Option<T>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), serde_json::to_string_pretty(value)?)?;
        Ok(())
    }

    pub fn load_preview(&self) -> StoreResult<Option<PreviewData>> {
        self.read(PREVIEW_KEY)
    }

    pub fn save_preview(&self, preview: &PreviewData) -> StoreResult<()> {
        self.write(PREVIEW_KEY, preview)
    }

    pub fn load_mapping(&self) -> StoreResult<Option<MappingData>> {
        self.read(MAPPING_KEY)
    }

    pub fn save_mapping(&self, mapping: &MappingData) -> StoreResult<()> {
        self.write(MAPPING_KEY, mapping)
    }

    /// Read-merge-write of the preview bundle. Returns the merged value.
    pub fn update_preview(&self, update: PreviewUpdate) -> StoreResult<PreviewData> {
        let stored = self.load_preview()?.unwrap_or_default();
        let merged = merge_preview(&stored, update);
        self.save_preview(&merged)?;
        Ok(merged)
    }

    /// Push the stored mapping into the preview bundle, keeping assignments.
    pub fn save_mapping_into_preview(&self) -> StoreResult<Option<PreviewData>> {
        match self.load_mapping()? {
            Some(mapping) => self.update_preview(PreviewUpdate::from(&mapping)).map(Some),
            None => Ok(None),
        }
    }

    pub fn clear(&self) -> StoreResult<()> {
        for key in [PREVIEW_KEY, MAPPING_KEY] {
            let path = self.path(key);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn initial_preview() -> PreviewData {
        serde_json::from_value(json!({
            "fileName": "file.xlsx",
            "sourceColumns": [{ "id": "s1", "name": "Unit" }, { "id": "s2", "name": "Description" }],
            "targetColumns": [
                { "id": "t1", "name": "Ident", "mappedColumns": [], "delimiter": " " },
                { "id": "t2", "name": "DESCP", "mappedColumns": ["s2"], "delimiter": " " }
            ],
            "columnGroups": { "t2": ["Spare"] },
            "mappedSources": { "t2": ["s2"] }
        }))
        .unwrap()
    }

    fn edited_mapping() -> MappingData {
        serde_json::from_value(json!({
            "fileName": "file.xlsx",
            "sourceColumns": [{ "id": "s1", "name": "Unit" }, { "id": "s2", "name": "Description" }],
            "targetColumns": [
                { "id": "t1", "name": "Ident", "mappedColumns": ["s1"], "delimiter": " " },
                { "id": "t2", "name": "DESCP", "mappedColumns": ["s1"], "delimiter": " " }
            ],
            "rows": []
        }))
        .unwrap()
    }

    #[test]
    fn test_merge_preserves_assignments() {
        let stored = initial_preview();
        let mapping = edited_mapping();
        let merged = merge_preview(&stored, PreviewUpdate::from(&mapping));

        assert_eq!(merged.target_columns, mapping.target_columns);
        assert_eq!(
            serde_json::to_string(&merged.column_groups).unwrap(),
            serde_json::to_string(&stored.column_groups).unwrap()
        );
        assert_eq!(merged.mapped_sources, stored.mapped_sources);
    }

    #[test]
    fn test_merge_overwrites_explicit_fields() {
        let stored = initial_preview();
        let mut groups = ColumnGroups::new();
        groups.insert("t1".into(), vec!["Assembly".into()]);
        let merged = merge_preview(
            &stored,
            PreviewUpdate {
                column_groups: Some(groups.clone()),
                ..Default::default()
            },
        );
        assert_eq!(merged.column_groups, Some(groups));
        assert_eq!(merged.target_columns, stored.target_columns);
    }

    #[test]
    fn test_unknown_keys_survive_roundtrip() {
        let preview: PreviewData = serde_json::from_value(json!({
            "sourceColumns": [],
            "projectId": "p-1"
        }))
        .unwrap();
        assert_eq!(preview.extra.get("projectId"), Some(&json!("p-1")));
        let back = serde_json::to_value(&preview).unwrap();
        assert_eq!(back["projectId"], json!("p-1"));
    }

    #[test]
    fn test_row_objects_keyed_by_id() {
        let mut preview = initial_preview();
        preview.rows = vec![vec!["pcs".into()]];
        let objects = preview.row_objects();
        assert_eq!(objects[0]["s1"], json!("pcs"));
        assert_eq!(objects[0]["s2"], json!(""));
    }

    #[test]
    fn test_store_mapping_into_preview() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_dir(dir.path());
        assert!(store.save_mapping_into_preview().unwrap().is_none());

        let mut stored = initial_preview();
        stored.rows = vec![vec!["pcs".into(), "Bolt".into()]];
        store.save_preview(&stored).unwrap();
        store.save_mapping(&edited_mapping()).unwrap();

        let merged = store.save_mapping_into_preview().unwrap().unwrap();
        assert_eq!(merged.target_columns[0].mapped_columns, vec!["s1"]);
        assert_eq!(merged.rows, stored.rows);
        assert_eq!(merged.column_groups, stored.column_groups);
        assert_eq!(store.load_preview().unwrap(), Some(merged));

        store.clear().unwrap();
        assert!(store.load_preview().unwrap().is_none());
    }
}
