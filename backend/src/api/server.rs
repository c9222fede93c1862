//! HTTP server for the sheetmap API.
//!
//! Exposes the transformation stages to the web client and keeps the
//! session workspace on disk between screens.
//!
//! # API Endpoints
//!
//! | Method | Path                   | Description                              |
//! |--------|------------------------|------------------------------------------|
//! | GET    | `/health`              | Health check                             |
//! | POST   | `/api/upload`          | Upload CSV/XLSX, get columns and preview |
//! | POST   | `/api/headers`         | Detect header rows of raw rows           |
//! | POST   | `/api/transform`       | Run pivots and the final transform       |
//! | POST   | `/api/pivot`           | Pivot one value column by a group column |
//! | POST   | `/api/pivot/apply`     | Merge pivot columns into the workspace   |
//! | POST   | `/api/detect-group`    | Guess the category column                |
//! | POST   | `/api/export`          | Download a table as csv, xlsx or json    |
//! | POST   | `/api/suggestions`     | Mapping suggestions                      |
//! | GET    | `/api/session/preview` | Stored workspace                         |
//! | POST   | `/api/session/preview` | Merge an update into the workspace       |
//! | POST   | `/api/session/mapping` | Hand the mapping over to the preview     |
//! | DELETE | `/api/session`         | Drop the workspace                       |
//! | GET    | `/api/logs`            | SSE stream for real-time logs            |

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{delete, get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_error, log_info, log_success, LOG_BROADCASTER};
use super::types::*;
use crate::ai::AiClient;
use crate::config::{AppConfig, MAX_UPLOAD_BYTES, PREVIEW_ROWS};
use crate::error::{AiError, PipelineError, ServerError, ServerResult, TransformError};
use crate::export::{export_bytes, sanitize_sheet_name, ExportFormat};
use crate::parser::{build_table, load_bytes, SourceTable};
use crate::session::{MappingData, PreviewData, PreviewUpdate, SessionStore};
use crate::transform::group_detect::detect_group_column_index;
use crate::transform::headers::{derive_leaf_headers, detect_header_rows, DEFAULT_MAX_HEADER_ROWS};
use crate::transform::pipeline::{compute_stats, transform_table};
use crate::transform::pivot::{pivot_by_group, pivot_column_defs};
use crate::transform::pivot_mapping::{apply_pivot_mappings_to_preview_data, PivotApplication};

struct AppState {
    config: AppConfig,
    session: SessionStore,
}

type SharedState = Arc<AppState>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(PipelineError::Transform(TransformError::MissingBaseColumn))
            | ServerError::Pipeline(PipelineError::InvalidConfig(_))
            | ServerError::Pipeline(PipelineError::Sheet(_))
            | ServerError::Pipeline(PipelineError::EmptyInput) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Pipeline(PipelineError::Ai(AiError::MissingApiKey(_))) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Pipeline(PipelineError::Ai(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        log_error(self.to_string());
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}

/// Build the router over `config`'s data directory.
pub fn router(config: AppConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    let state = Arc::new(AppState {
        session: SessionStore::with_dir(config.session_dir()),
        config,
    });

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/upload", post(upload))
        .route("/api/headers", post(headers))
        .route("/api/transform", post(transform))
        .route("/api/pivot", post(pivot))
        .route("/api/pivot/apply", post(apply_pivot))
        .route("/api/detect-group", post(detect_group))
        .route("/api/export", post(export))
        .route("/api/suggestions", post(suggestions))
        .route("/api/session/preview", get(get_preview).post(update_preview))
        .route("/api/session/mapping", post(save_mapping))
        .route("/api/session", delete(clear_session))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.port;
    let app = router(config);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("sheetmap server running on http://localhost:{}", port);
    println!("   POST /api/upload    - Upload CSV/XLSX file");
    println!("   POST /api/transform - Transform a mapped table");
    println!("   GET  /api/logs      - SSE log stream");
    println!("   GET  /health        - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "sheetmap",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    F: FnOnce() -> Result<T, ServerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
}

/// Upload endpoint: parse, detect headers, store the workspace, return a preview.
async fn upload(
    State(state): State<SharedState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> ServerResult<Json<PreviewResponse>> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().map(|s| s.to_string());
            file_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?
                    .to_vec(),
            );
        }
    }

    let bytes = file_data.ok_or_else(|| ServerError::BadRequest("No file provided".to_string()))?;
    let job_id = uuid::Uuid::new_v4().to_string();
    log_info(format!(
        "New upload: {} ({} bytes)",
        file_name.as_deref().unwrap_or("unknown"),
        bytes.len()
    ));

    let name = file_name.clone();
    let (raw, table) = blocking(move || {
        let raw = load_bytes(&bytes, name.as_deref()).map_err(PipelineError::from)?;
        let table = build_table(&raw, query.header_rows);
        Ok((raw, table))
    })
    .await?;

    let group_column = detect_group_column_index(&table.rows, &table.source_columns, None)
        .map(|i| table.source_columns[i].id.clone());

    state.session.clear().map_err(PipelineError::from)?;
    state
        .session
        .update_preview(PreviewUpdate {
            file_name: file_name.clone(),
            source_columns: Some(table.source_columns.clone()),
            rows: Some(table.rows.clone()),
            ..Default::default()
        })
        .map_err(PipelineError::from)?;

    log_success(format!(
        "{} columns, {} data rows",
        table.source_columns.len(),
        table.rows.len()
    ));
    Ok(Json(PreviewResponse::new(job_id, file_name, &raw, table, PREVIEW_ROWS, group_column)))
}

async fn headers(Json(req): Json<HeadersRequest>) -> Json<HeadersResponse> {
    let max = req.max_header_rows.unwrap_or(DEFAULT_MAX_HEADER_ROWS);
    Json(HeadersResponse {
        header_rows: detect_header_rows(&req.rows, max),
        leaf_headers: derive_leaf_headers(&req.rows, max),
    })
}

async fn transform(Json(req): Json<TransformRequest>) -> ServerResult<Json<TransformResponse>> {
    let rows_processed = req.rows.len();
    let stats = compute_stats(&req.config, rows_processed);

    let (result, pivot_columns) = blocking(move || {
        let table = SourceTable {
            source_columns: req.source_columns,
            header_rows: Vec::new(),
            rows: req.rows,
        };
        Ok(transform_table(table, None, &req.config, &req.options)?)
    })
    .await?;

    Ok(Json(TransformResponse {
        status: "ready".to_string(),
        result,
        stats,
        pivot_columns,
    }))
}

async fn pivot(Json(req): Json<PivotRequest>) -> Json<PivotResponse> {
    let pivot = pivot_by_group(
        &req.rows,
        req.group_column,
        req.value_column,
        req.method,
        req.parent_label.as_deref(),
    );
    let pivot_columns = pivot_column_defs(&pivot.new_columns);
    Json(PivotResponse { pivot, pivot_columns })
}

async fn apply_pivot(State(state): State<SharedState>, Json(req): Json<ApplyPivotRequest>) -> ServerResult<Json<PivotApplication>> {
    let applied = apply_pivot_mappings_to_preview_data(
        &req.preview_data,
        &req.pivot_col_defs,
        &req.pivot_mappings,
        &req.transformed_before_rows,
        &req.assignments,
    );
    state
        .session
        .save_preview(&applied.updated_preview_data)
        .map_err(PipelineError::from)?;
    Ok(Json(applied))
}

async fn detect_group(Json(req): Json<DetectGroupRequest>) -> Json<DetectGroupResponse> {
    let index = detect_group_column_index(&req.rows, &req.source_columns, req.exclude);
    Json(DetectGroupResponse {
        index,
        column_id: index.and_then(|i| req.source_columns.get(i)).map(|c| c.id.clone()),
    })
}

async fn export(Query(query): Query<ExportQuery>, Json(req): Json<ExportRequest>) -> ServerResult<Response> {
    let format: ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("csv")
        .parse()
        .map_err(|e: crate::error::ExportError| ServerError::BadRequest(e.to_string()))?;
    let name = sanitize_sheet_name(req.name.as_deref().unwrap_or("transformed")).replace('"', "");

    let sheet = name.clone();
    let bytes = blocking(move || Ok(export_bytes(&req.table, format, &sheet).map_err(PipelineError::from)?)).await?;

    let headers = [
        (header::CONTENT_TYPE, format.content_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.{}\"", name, format.extension()),
        ),
    ];
    Ok((headers, bytes).into_response())
}

async fn suggestions(State(state): State<SharedState>, Json(req): Json<SuggestionsRequest>) -> ServerResult<Json<SuggestionsResponse>> {
    let client = AiClient::from_config(&state.config).map_err(PipelineError::from)?;
    let suggestions = client
        .suggest_mappings(&req.columns, req.project.as_ref())
        .await
        .map_err(PipelineError::from)?;
    Ok(Json(SuggestionsResponse { suggestions }))
}

async fn get_preview(State(state): State<SharedState>) -> ServerResult<Json<PreviewData>> {
    let preview = state.session.load_preview().map_err(PipelineError::from)?;
    Ok(Json(preview.unwrap_or_default()))
}

async fn update_preview(State(state): State<SharedState>, Json(update): Json<PreviewUpdate>) -> ServerResult<Json<PreviewData>> {
    Ok(Json(state.session.update_preview(update).map_err(PipelineError::from)?))
}

async fn save_mapping(State(state): State<SharedState>, Json(mapping): Json<MappingData>) -> ServerResult<Json<PreviewData>> {
    state.session.save_mapping(&mapping).map_err(PipelineError::from)?;
    let preview = state
        .session
        .save_mapping_into_preview()
        .map_err(PipelineError::from)?
        .unwrap_or_default();
    Ok(Json(preview))
}

async fn clear_session(State(state): State<SharedState>) -> ServerResult<StatusCode> {
    state.session.clear().map_err(PipelineError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let missing_base = ServerError::Pipeline(PipelineError::Transform(TransformError::MissingBaseColumn));
        assert_eq!(missing_base.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bad = ServerError::BadRequest("no file".into());
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let no_key = ServerError::Pipeline(PipelineError::Ai(AiError::MissingApiKey("unset".into())));
        assert_eq!(no_key.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_detect_group_handler() {
        let req: DetectGroupRequest = serde_json::from_value(json!({
            "rows": [["A-1", "Assembly"], ["S-1", "Spare"]],
            "sourceColumns": [{ "id": "s1", "name": "Item" }, { "id": "s2", "name": "Category" }]
        }))
        .unwrap();

        let Json(resp) = detect_group(Json(req)).await;
        assert_eq!(resp.index, Some(1));
        assert_eq!(resp.column_id.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn test_transform_handler_reports_missing_base() {
        let req: TransformRequest = serde_json::from_value(json!({
            "rows": [["A-1"]],
            "sourceColumns": [{ "id": "s1", "name": "Item" }],
            "targetColumns": [{ "id": "t1", "name": "Part", "mappedColumns": ["s1"] }]
        }))
        .unwrap();

        let err = transform(Json(req)).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Pipeline(PipelineError::Transform(TransformError::MissingBaseColumn))
        ));
    }

    #[tokio::test]
    async fn test_session_mapping_flow_keeps_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default().with_data_dir(Some(dir.path().to_path_buf()));
        let state = Arc::new(AppState {
            session: SessionStore::with_dir(config.session_dir()),
            config,
        });

        let update: PreviewUpdate = serde_json::from_value(json!({
            "columnGroups": { "t2": ["Spare"] },
            "mappedSources": { "t2": ["s2"] }
        }))
        .unwrap();
        update_preview(State(state.clone()), Json(update)).await.unwrap();

        let mapping: MappingData = serde_json::from_value(json!({
            "sourceColumns": [{ "id": "s2", "name": "Base" }],
            "targetColumns": [{ "id": "t2", "name": "Spare part" }]
        }))
        .unwrap();
        let Json(preview) = save_mapping(State(state), Json(mapping)).await.unwrap();

        assert_eq!(preview.target_columns[0].id, "t2");
        assert_eq!(preview.column_groups.unwrap()["t2"], vec!["Spare"]);
        assert_eq!(preview.mapped_sources.unwrap()["t2"], vec!["s2"]);
    }
}
