//! High-level pipeline API: sheet in, transformed table out.
//!
//! This module strings the pure stages together and reports each step
//! through the log broadcaster: reading, header detection, the optional
//! column-method pivot stage, and the final transform.
//!
//! # Example
//!
//! ```rust,ignore
//! use sheetmap::transform::{transform_file, TransformConfig, TransformOptions};
//! use std::path::Path;
//!
//! let config = TransformConfig::load("mapping.json")?;
//! let output = transform_file(Path::new("plant.xlsx"), &config, &TransformOptions::default())?;
//! println!("{} rows", output.result.rows.len());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::api::logs::{log_info, log_info_indent, log_success, log_warning};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{cell, PivotColumnDef, ProjectStats, RowObject, SourceColumn};
use crate::parser::{build_table, load_bytes, load_sheet, RawSheet, SourceTable};
use crate::session::PreviewData;
use crate::transform::config::TransformConfig;
use crate::transform::engine::{transform_excel_data, TransformedTable};
use crate::transform::group_detect::detect_group_column_index;
use crate::transform::pivot::{pivot_by_group, pivot_column_defs};
use crate::transform::pivot_mapping::{apply_pivot_mappings_to_preview_data, PivotAssignments};

/// Options for the transformation pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOptions {
    /// Ceiling on detected header rows; overrides the config's `headerRows`.
    #[serde(default)]
    pub header_rows: Option<usize>,

    /// Skip the column-method pivot stage even when the config defines one.
    #[serde(default)]
    pub skip_pivots: bool,
}

/// Input file information
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub file_name: Option<String>,
    pub encoding: String,
    pub delimiter: Option<char>,
    /// Leaf header per column.
    pub headers: Vec<String>,
    pub header_rows: usize,
    pub row_count: usize,
}

/// Result of a complete pipeline run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub result: TransformedTable,
    pub source_info: SourceInfo,
    pub stats: ProjectStats,
    /// Pivot columns created by the column-method stage.
    pub pivot_columns: Vec<PivotColumnDef>,
}

/// Workspace after the column-method pivot stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotStageResult {
    pub preview: PreviewData,
    pub pivot_columns: Vec<PivotColumnDef>,
}

/// Transform a CSV or XLSX file.
pub fn transform_file(path: &Path, config: &TransformConfig, options: &TransformOptions) -> PipelineResult<PipelineOutput> {
    log_info(format!("Reading {}...", path.display()));
    let raw = load_sheet(path)?;
    let file_name = path.file_name().and_then(|n| n.to_str());
    transform_raw(raw, file_name, config, options)
}

/// Same as [`transform_file`] for uploaded bytes; `file_name` selects the format.
pub fn transform_bytes(
    bytes: &[u8],
    file_name: Option<&str>,
    config: &TransformConfig,
    options: &TransformOptions,
) -> PipelineResult<PipelineOutput> {
    let raw = load_bytes(bytes, file_name)?;
    transform_raw(raw, file_name, config, options)
}

/// Transform an already-read sheet.
pub fn transform_raw(
    raw: RawSheet,
    file_name: Option<&str>,
    config: &TransformConfig,
    options: &TransformOptions,
) -> PipelineResult<PipelineOutput> {
    if raw.rows.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    log_success(format!("Detected encoding: {}", raw.encoding));
    if let Some(d) = raw.delimiter {
        log_success(format!("Detected separator: '{}'", format_delimiter(d)));
    }

    let max_header_rows = options.header_rows.or(config.header_rows);
    let table = build_table(&raw, max_header_rows);
    log_success(format!(
        "{} header row(s), {} data rows",
        table.header_rows.len(),
        table.rows.len()
    ));
    log_info(format!("Sheet has {} columns:", table.source_columns.len()));
    for (i, col) in table.source_columns.iter().enumerate() {
        log_info_indent(format!("[{:2}] {}", i + 1, col.name), 1);
    }

    let source_info = SourceInfo {
        file_name: file_name.map(str::to_string),
        encoding: raw.encoding,
        delimiter: raw.delimiter,
        headers: table.source_columns.iter().map(|c| c.name.clone()).collect(),
        header_rows: table.header_rows.len(),
        row_count: table.rows.len(),
    };

    let (result, pivot_columns) = transform_table(table, file_name, config, options)?;
    let stats = compute_stats(config, source_info.row_count);

    Ok(PipelineOutput {
        result,
        source_info,
        stats,
        pivot_columns,
    })
}

/// Run the pivot stage (unless skipped) and the final transform over `table`.
pub fn transform_table(
    table: SourceTable,
    file_name: Option<&str>,
    config: &TransformConfig,
    options: &TransformOptions,
) -> PipelineResult<(TransformedTable, Vec<PivotColumnDef>)> {
    let config = config.resolve_against(&table.source_columns);
    let mut preview = workspace_for(table, file_name, &config);

    let mut pivot_columns = Vec::new();
    if config.has_pivots() && !options.skip_pivots {
        log_info("Running column pivots...");
        let stage = run_column_pivots(&preview);
        log_success(format!("{} pivot column(s)", stage.pivot_columns.len()));
        preview = stage.preview;
        pivot_columns = stage.pivot_columns;
    }

    log_info("Executing transformation...");
    let mut payload = config.payload(preview.rows, preview.source_columns);
    payload.target_columns = preview.target_columns;
    let result = transform_excel_data(&payload)?;
    log_success(format!("{} output rows, {} columns", result.rows.len(), result.columns.len()));

    Ok((result, pivot_columns))
}

/// The workspace bundle for a freshly read table under `config`.
pub fn workspace_for(table: SourceTable, file_name: Option<&str>, config: &TransformConfig) -> PreviewData {
    PreviewData {
        file_name: file_name.map(str::to_string),
        source_columns: table.source_columns,
        target_columns: config.target_columns.clone(),
        rows: table.rows,
        column_groups: config.column_groups.clone(),
        column_preferred_base: config.column_preferred_base.clone(),
        column_methods: config.column_methods.clone(),
        column_base_column: config.column_base_column.clone(),
        pivot_group_assignments: config.pivot_group_assignments.clone(),
        ..Default::default()
    }
}

/// Pivot each target that has a method in `columnMethods`.
///
/// The value column is the target's first mapped source; the group column
/// is `columnBaseColumn[target]` or, failing that, the detected category
/// column (never the value column). Targets where either cannot be resolved
/// are skipped. The new columns are attached to their target, subject to
/// `pivotGroupAssignments`.
pub fn run_column_pivots(preview: &PreviewData) -> PivotStageResult {
    let mut current = preview.clone();
    let mut pivot_columns: Vec<PivotColumnDef> = Vec::new();

    let Some(methods) = preview.column_methods.clone() else {
        return PivotStageResult {
            preview: current,
            pivot_columns,
        };
    };

    for (target_id, method) in &methods {
        let Some(value_idx) = current
            .target(target_id)
            .and_then(|t| t.mapped_columns.first())
            .and_then(|id| current.column_index(id))
        else {
            log_warning(format!("Pivot skipped for {}: no mapped value column", target_id));
            continue;
        };

        let explicit_group = current
            .column_base_column
            .as_ref()
            .and_then(|m| m.get(target_id))
            .and_then(|id| current.column_index(id));
        let Some(group_idx) = explicit_group
            .or_else(|| detect_group_column_index(&current.rows, &current.source_columns, Some(value_idx)))
        else {
            log_warning(format!("Pivot skipped for {}: no group column", target_id));
            continue;
        };

        let parent_label = current
            .column_preferred_base
            .as_ref()
            .and_then(|m| m.get(target_id))
            .map(String::as_str);

        // Pivot cells land after each row's last cell, so rows must be exactly as wide as the columns.
        let width = current.source_columns.len();
        for row in &mut current.rows {
            row.resize(width, String::new());
        }

        let pivot = pivot_by_group(&current.rows, group_idx, value_idx, *method, parent_label);
        let defs = pivot_column_defs(&pivot.new_columns);
        log_info_indent(
            format!(
                "{}: {} by {} ({}) -> {} column(s)",
                target_id,
                current.source_columns[value_idx].name,
                current.source_columns[group_idx].name,
                method,
                defs.len()
            ),
            1,
        );

        let before_rows = pivot_row_objects(&current.source_columns, &defs, &pivot.transformed_rows);
        let mappings: BTreeMap<String, String> = defs.iter().map(|d| (d.id.clone(), target_id.clone())).collect();
        let assignments = PivotAssignments {
            pivot_group_assignments: current.pivot_group_assignments.clone(),
            ..Default::default()
        };

        let applied = apply_pivot_mappings_to_preview_data(&current, &defs, &mappings, &before_rows, &assignments);
        current = applied.updated_preview_data;

        for def in defs {
            if !pivot_columns.iter().any(|p| p.id == def.id) {
                pivot_columns.push(def);
            }
        }
    }

    PivotStageResult {
        preview: current,
        pivot_columns,
    }
}

/// Key pivoted rows by column id. Pivot cells never replace an existing column.
fn pivot_row_objects(
    source_columns: &[SourceColumn],
    defs: &[PivotColumnDef],
    rows: &[Vec<String>],
) -> Vec<RowObject> {
    let existing: HashSet<&str> = source_columns.iter().map(|c| c.id.as_str()).collect();
    let width = source_columns.len();

    rows.iter()
        .map(|row| {
            let mut obj: RowObject = source_columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.id.clone(), Value::String(cell(row, i).to_string())))
                .collect();
            for (j, def) in defs.iter().enumerate() {
                if !existing.contains(def.id.as_str()) {
                    obj.insert(def.id.clone(), Value::String(cell(row, width + j).to_string()));
                }
            }
            obj
        })
        .collect()
}

/// Stats recorded for a run over `rows_processed` data rows.
pub fn compute_stats(config: &TransformConfig, rows_processed: usize) -> ProjectStats {
    ProjectStats {
        columns_mapped: config
            .target_columns
            .iter()
            .filter(|t| !t.mapped_columns.is_empty())
            .count(),
        rules_applied: config.rule_count(),
        rows_processed,
        errors_fixed: 0,
    }
}

/// Format delimiter for display
fn format_delimiter(d: char) -> &'static str {
    match d {
        ';' => ";",
        ',' => ",",
        '\t' => "TAB",
        '|' => "|",
        _ => "?",
    }
}
