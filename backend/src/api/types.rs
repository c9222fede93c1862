//! REST API types for frontend integration.
//!
//! Request and response bodies are camelCase JSON, the same shapes the
//! session bundle uses, so the mapping screen can post its state as-is.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::ai::MappingSuggestion;
use crate::models::{PivotColumnDef, PivotMethod, ProjectStats, Row, RowObject, SourceColumn};
use crate::parser::{RawSheet, SourceTable};
use crate::session::PreviewData;
use crate::transform::config::TransformConfig;
use crate::transform::engine::TransformedTable;
use crate::transform::pipeline::TransformOptions;
use crate::transform::pivot::PivotResult;
use crate::transform::pivot_mapping::PivotAssignments;

/// Query of `POST /api/upload`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    #[serde(default)]
    pub header_rows: Option<usize>,
}

/// Response sent to the frontend after an upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    /// Upload identifier, echoed in logs.
    pub job_id: String,
    pub status: String,
    pub file_name: Option<String>,
    pub encoding: String,
    pub delimiter: Option<String>,
    pub source_columns: Vec<SourceColumn>,
    pub header_rows: Vec<Row>,
    /// First data rows only.
    pub rows: Vec<Row>,
    pub total_rows: usize,
    /// Id of the detected category column.
    pub group_column: Option<String>,
}

impl PreviewResponse {
    pub fn new(job_id: String, file_name: Option<String>, raw: &RawSheet, table: SourceTable, preview_rows: usize, group_column: Option<String>) -> Self {
        let total_rows = table.rows.len();
        Self {
            job_id,
            status: "ready".to_string(),
            file_name,
            encoding: raw.encoding.clone(),
            delimiter: raw.delimiter.map(|d| d.to_string()),
            source_columns: table.source_columns,
            header_rows: table.header_rows,
            rows: table.rows.into_iter().take(preview_rows).collect(),
            total_rows,
            group_column,
        }
    }
}

/// Body of `POST /api/headers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersRequest {
    pub rows: Vec<Row>,
    #[serde(default)]
    pub max_header_rows: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersResponse {
    pub header_rows: Vec<Row>,
    pub leaf_headers: Vec<String>,
}

/// Body of `POST /api/transform`: a table plus its transform configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub rows: Vec<Row>,
    pub source_columns: Vec<SourceColumn>,
    #[serde(flatten)]
    pub config: TransformConfig,
    #[serde(default)]
    pub options: TransformOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResponse {
    pub status: String,
    pub result: TransformedTable,
    pub stats: ProjectStats,
    pub pivot_columns: Vec<PivotColumnDef>,
}

/// Body of `POST /api/pivot`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotRequest {
    pub rows: Vec<Row>,
    pub group_column: usize,
    pub value_column: usize,
    pub method: PivotMethod,
    #[serde(default)]
    pub parent_label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotResponse {
    #[serde(flatten)]
    pub pivot: PivotResult,
    pub pivot_columns: Vec<PivotColumnDef>,
}

/// Body of `POST /api/pivot/apply`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPivotRequest {
    pub preview_data: PreviewData,
    pub pivot_col_defs: Vec<PivotColumnDef>,
    /// Pivot column id -> target id.
    #[serde(default)]
    pub pivot_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub transformed_before_rows: Vec<RowObject>,
    #[serde(flatten)]
    pub assignments: PivotAssignments,
}

/// Body of `POST /api/detect-group`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectGroupRequest {
    pub rows: Vec<Row>,
    pub source_columns: Vec<SourceColumn>,
    #[serde(default)]
    pub exclude: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectGroupResponse {
    pub index: Option<usize>,
    pub column_id: Option<String>,
}

/// Query of `POST /api/export`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// Body of `POST /api/export`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    #[serde(flatten)]
    pub table: TransformedTable,
    /// Sheet and file base name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Body of `POST /api/suggestions`.
#[derive(Debug, Clone, Deserialize)]
pub struct SuggestionsRequest {
    pub columns: Vec<String>,
    #[serde(default)]
    pub project: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<MappingSuggestion>,
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let body = error_response("Base column missing");
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Base column missing");
    }

    #[test]
    fn test_transform_request_flattens_config() {
        let req: TransformRequest = serde_json::from_value(json!({
            "rows": [["Assembly", "A-1"]],
            "sourceColumns": [{ "id": "s1", "name": "Base" }, { "id": "s2", "name": "Item" }],
            "targetColumns": [{ "id": "t1", "name": "Part", "mappedColumns": ["s2"] }],
            "columnGroups": { "t1": ["Assembly"] }
        }))
        .unwrap();

        assert_eq!(req.config.target_columns[0].mapped_columns, vec!["s2"]);
        assert!(req.config.column_groups.is_some());
        assert_eq!(req.options, TransformOptions::default());
    }

    #[test]
    fn test_apply_pivot_request_assignments() {
        let req: ApplyPivotRequest = serde_json::from_value(json!({
            "previewData": { "sourceColumns": [], "targetColumns": [] },
            "pivotColDefs": [{ "id": "pivot_spare", "name": "Spare" }],
            "pivotMappings": { "pivot_spare": "t1" },
            "pivotGroupAssignments": { "t1": ["Spare"] }
        }))
        .unwrap();

        assert_eq!(req.pivot_mappings["pivot_spare"], "t1");
        assert!(req.assignments.pivot_group_assignments.is_some());
        assert!(req.assignments.column_groups.is_none());
    }
}
