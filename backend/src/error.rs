//! Error types for the Sheetmap transformation pipeline.
//!
//! This module defines one error type per concern:
//!
//! - [`SheetError`] - Reading and parsing CSV/XLSX input
//! - [`TransformError`] - Core transform input errors
//! - [`AiError`] - Mapping suggestion client errors
//! - [`RegistryError`] - Template registry errors
//! - [`StoreError`] - Project/session persistence errors
//! - [`ExportError`] - CSV/XLSX/JSON writer errors
//! - [`PipelineError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Sheet Reading Errors
// =============================================================================

/// Errors while reading a spreadsheet.
#[derive(Debug, Error)]
pub enum SheetError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode content.
    #[error("Failed to decode content: {0}")]
    Encoding(String),

    /// Invalid delimited text.
    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Workbook could not be opened or read.
    #[error("Workbook error: {0}")]
    Xlsx(String),

    /// Nothing to read.
    #[error("Spreadsheet is empty")]
    EmptyFile,
}

// =============================================================================
// Transformation Errors
// =============================================================================

/// Errors raised by the transform engine.
#[derive(Debug, Error)]
pub enum TransformError {
    /// No source column is named "Base" (case-insensitive).
    #[error("Base column not found in source data")]
    MissingBaseColumn,

    /// Transform configuration is unusable.
    #[error("Invalid transform configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// AI Client Errors
// =============================================================================

/// Errors from the mapping suggestion client.
#[derive(Debug, Error)]
pub enum AiError {
    /// Missing API key.
    #[error("Missing API key: {0}")]
    MissingApiKey(String),

    /// Request has nothing to suggest for.
    #[error("Invalid suggestion request: {0}")]
    InvalidRequest(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Upstream API answered with an error.
    #[error("API error: {0}")]
    ApiError(String),

    /// Response body was not the expected JSON envelope.
    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the template registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Template not found.
    #[error("Template not found: {0}")]
    NotFound(String),

    /// Invalid template data.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// IO error.
    #[error("Registry IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Registry JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the persistence collaborator.
///
/// Carries a message and an optional machine-readable code, the same
/// shape a hosted backend returns next to `data: null`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    pub code: Option<String>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        Self::new(format!("{} not found: {}", what, id)).with_code("not_found")
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string()).with_code("io")
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string()).with_code("json")
    }
}

impl From<RegistryError> for StoreError {
    fn from(e: RegistryError) -> Self {
        let code = match e {
            RegistryError::NotFound(_) => "not_found",
            _ => "registry",
        };
        Self::new(e.to_string()).with_code(code)
    }
}

// =============================================================================
// Export Errors
// =============================================================================

/// Errors while writing an export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// IO error.
    #[error("Export IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error.
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    /// Workbook writer error.
    #[error("XLSX export failed: {0}")]
    Xlsx(String),

    /// JSON error.
    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown format name.
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),
}

impl From<rust_xlsxwriter::XlsxError> for ExportError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        ExportError::Xlsx(e.to_string())
    }
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the main error type returned by [`crate::transform::pipeline::transform_file`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Spreadsheet reading error.
    #[error("Sheet error: {0}")]
    Sheet(#[from] SheetError),

    /// Transformation error.
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// AI client error.
    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Export error.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Config failed schema validation.
    #[error("Config validation failed: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// No data rows to transform.
    #[error("No data rows to transform")]
    EmptyInput,
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Sheet(SheetError::Io(e))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Transform(TransformError::Json(e))
    }
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for sheet reading.
pub type SheetResult<T> = Result<T, SheetError>;

/// Result type for transformation operations.
pub type TransformResult<T> = Result<T, TransformError>;

/// Result type for AI operations.
pub type AiResult<T> = Result<T, AiError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for exports.
pub type ExportResult<T> = Result<T, ExportError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // SheetError -> PipelineError
        let sheet_err = SheetError::EmptyFile;
        let pipeline_err: PipelineError = sheet_err.into();
        assert!(pipeline_err.to_string().contains("empty"));

        // TransformError -> PipelineError
        let pipeline_err: PipelineError = TransformError::MissingBaseColumn.into();
        assert!(pipeline_err.to_string().contains("Base column"));
    }

    #[test]
    fn test_store_error_carries_code() {
        let err = StoreError::not_found("Project", "p-1");
        assert_eq!(err.code.as_deref(), Some("not_found"));
        assert!(err.to_string().contains("p-1"));

        let from_registry: StoreError = RegistryError::NotFound("t-1".into()).into();
        assert_eq!(from_registry.code.as_deref(), Some("not_found"));
    }

    #[test]
    fn test_invalid_config_joins_messages() {
        let err = PipelineError::InvalidConfig(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Config validation failed: a; b");
    }
}
