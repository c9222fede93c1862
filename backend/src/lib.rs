//! # Sheetmap - spreadsheet column mapping and base-aware transformation
//!
//! Sheetmap reads CSV and XLSX sheets with multi-row headers, maps their
//! columns onto a target schema and rebuilds the table from per-row
//! categories ("Base": Equipment, Assembly, Spare, ...).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//! │ CSV / XLSX  │──▶│   Parser    │──▶│   Pivots    │──▶│   Engine    │──▶│   Export    │
//! │ (any enc.)  │   │  (headers)  │   │ (optional)  │   │ (base rules)│   │ csv/xlsx/js │
//! └─────────────┘   └─────────────┘   └─────────────┘   └─────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sheetmap::{transform_file, TransformConfig, TransformOptions};
//! use std::path::Path;
//!
//! let config = TransformConfig::load("mapping.json")?;
//! let output = transform_file(Path::new("plant.xlsx"), &config, &TransformOptions::default())?;
//! println!("{} rows kept", output.result.rows.len());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`config`] - Application settings and constants
//! - [`models`] - Columns, rules and pivot definitions
//! - [`parser`] - CSV/XLSX reading with auto-detection
//! - [`transform`] - Header detection, pivots, the engine and the pipeline
//! - [`validation`] - JSON Schema checks for transform configs
//! - [`session`] - Workspace shared between mapping and preview
//! - [`export`] - CSV, XLSX and JSON writers
//! - [`store`] - Projects and batch jobs
//! - [`cache`] - Reusable mapping templates
//! - [`ai`] - Mapping suggestions
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Reading
pub mod parser;

// Transformation
pub mod transform;

// Validation
pub mod validation;

// Persistence
pub mod cache;
pub mod session;
pub mod store;

// Output
pub mod export;

// AI
pub mod ai;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    AiError, ExportError, PipelineError, RegistryError, ServerError, SheetError, StoreError, TransformError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    BaseRule, ColumnGroups, ColumnType, CombineRule, OutputColumn, PivotColumnDef, PivotMethod, ProjectStats, Row,
    SourceColumn, TargetColumn,
};

// =============================================================================
// Re-exports - Core stages
// =============================================================================

pub use transform::{
    apply_pivot_mappings_to_preview_data, derive_leaf_headers, detect_group_column_index, detect_header_rows,
    normalize_base, pivot_by_group, transform_excel_data, TransformPayload, TransformedTable,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use config::AppConfig;
pub use parser::{build_table, load_sheet, RawSheet, SourceTable};
pub use transform::{
    run_column_pivots, transform_bytes, transform_file, PipelineOutput, SourceInfo, TransformConfig,
    TransformOptions,
};

// =============================================================================
// Re-exports - Persistence, export, AI
// =============================================================================

pub use ai::{AiClient, MappingSuggestion};
pub use cache::{StoredTemplate, TemplateRegistry};
pub use export::{export_bytes, export_to_path, ExportFormat};
pub use session::{merge_preview, MappingData, PreviewData, PreviewUpdate, SessionStore};
pub use store::{ProjectStore, Project, ProjectDetail};

// =============================================================================
// Server
// =============================================================================

pub use api::server;
