//! Transformation module.
//!
//! Pure stages, leaf first:
//! - Headers: header row detection and leaf header names
//! - Base: row category normalization
//! - Group detection: guess the category column
//! - Pivot: one column per distinct group value
//! - Pivot mapping: merge pivot columns into the workspace
//! - Engine: the final mapped, filtered table
//!
//! `config` and `pipeline` wire them to files and logging.

pub mod base;
pub mod config;
pub mod engine;
pub mod group_detect;
pub mod headers;
pub mod pipeline;
pub mod pivot;
pub mod pivot_mapping;

pub use base::{is_assembly_or_spare, normalize_base};
pub use config::TransformConfig;
pub use engine::{transform_excel_data, TransformPayload, TransformedTable, BASE_COLUMN, CUSTOM_COLUMN, NO_SPARE};
pub use group_detect::detect_group_column_index;
pub use headers::{derive_leaf_headers, detect_header_rows, DEFAULT_MAX_HEADER_ROWS};
pub use pipeline::*;
pub use pivot::{pivot_by_group, pivot_column_defs, pivot_column_id, PivotResult};
pub use pivot_mapping::{apply_pivot_mappings_to_preview_data, PivotApplication, PivotAssignments};
