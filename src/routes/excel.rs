use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    config::Config,
    error::AppError,
    models::{FileDetail, FileRecord, FileSummary, ListQuery, NewFile, Pagination, UploadedFile},
    routes::owner::Owner,
    services::{
        excel::{
            analyzer::{ColumnSummary, SheetAnalysis},
            chart::{group_sum, ChartKind},
            types::{Row, Sheet, WorkbookFormat},
            ExtractError, SheetAnalyzer,
        },
        uploads::{detect_format, StoredFile},
    },
    AppState,
};

pub const MAX_DESCRIPTION_LEN: usize = 500;

const DATASET_BACKGROUND: &str = "rgba(54, 162, 235, 0.6)";
const DATASET_BORDER: &str = "rgba(54, 162, 235, 1)";

pub fn routes(config: &Config) -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route(
            "/api/excel/upload",
            post(upload_files).layer(DefaultBodyLimit::max(config.upload_body_limit())),
        )
        .route("/api/excel/files", get(list_files))
        .route("/api/excel/files/:id", get(get_file).delete(delete_file))
        .route("/api/excel/:id/data", get(get_file_data))
        .route("/api/excel/:id/analyze", post(analyze_chart))
        .route("/api/excel/:id/download", get(download_file))
        .route("/api/excel/analyze/:id/:sheet_name", get(analyze_sheet))
        .route("/api/excel/chart-data/:id/:sheet_name", get(chart_data))
        .layer(cors)
}

fn find_file(state: &AppState, owner: &Owner, id: &str) -> Result<FileRecord, AppError> {
    state
        .store
        .find(&owner.0, id)?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))
}

fn find_sheet(state: &AppState, file: &FileRecord, sheet_name: &str) -> Result<Sheet, AppError> {
    state
        .store
        .sheet_by_name(file, sheet_name)?
        .ok_or_else(|| AppError::NotFound("Sheet not found".to_string()))
}

fn first_sheet(state: &AppState, file: &FileRecord) -> Result<Sheet, AppError> {
    state
        .store
        .first_sheet(file)?
        .ok_or_else(|| AppError::NotFound("No data found in file".to_string()))
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

struct PendingUpload {
    original_name: String,
    content_type: Option<String>,
    data: Bytes,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    message: String,
    files: Vec<UploadedFile>,
}

/// Tags arrive as a JSON string; anything but an array yields no tags.
fn parse_tags(raw: Option<&str>) -> Result<Vec<String>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(Vec::new());
    };
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|_| AppError::InvalidInput("Tags must be a valid JSON string".to_string()))?;

    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|tag| !tag.is_empty())
            .collect(),
        _ => Vec::new(),
    })
}

async fn upload_files(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let start = std::time::Instant::now();
    let mut pending = Vec::new();
    let mut description = String::new();
    let mut raw_tags: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let original_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;

                if data.len() > state.config.max_file_size {
                    return Err(AppError::PayloadTooLarge(format!(
                        "{} exceeds the {} byte upload limit",
                        original_name, state.config.max_file_size
                    )));
                }
                if pending.len() >= state.config.max_files_per_upload {
                    return Err(AppError::InvalidInput(format!(
                        "At most {} files can be uploaded at once",
                        state.config.max_files_per_upload
                    )));
                }
                pending.push(PendingUpload { original_name, content_type, data });
            }
            "description" => description = field.text().await?.trim().to_string(),
            "tags" => raw_tags = Some(field.text().await?),
            other => tracing::debug!("Ignoring multipart field {}", other),
        }
    }

    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(AppError::InvalidInput(format!(
            "Description cannot exceed {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    let tags = parse_tags(raw_tags.as_deref())?;

    if pending.is_empty() {
        return Err(AppError::InvalidInput("No files uploaded".to_string()));
    }

    let formats = pending
        .iter()
        .map(|upload| detect_format(&upload.original_name, upload.content_type.as_deref()))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!("Upload of {} files by {}", pending.len(), owner.0);

    let mut written: Vec<StoredFile> = Vec::new();
    let mut uploaded: Vec<UploadedFile> = Vec::new();
    let mut persisted: Vec<String> = Vec::new();

    for (upload, format) in pending.into_iter().zip(formats) {
        let outcome = store_upload(&state, &owner, &description, &tags, upload, format, &mut written).await;
        match outcome {
            Ok(Some((record, file))) => {
                persisted.push(record.id);
                uploaded.push(file);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Upload failed, cleaning up: {}", e);
                for id in &persisted {
                    if let Err(err) = state.store.delete(&owner.0, id) {
                        tracing::error!("Failed to roll back file record {}: {}", id, err);
                    }
                }
                for stored in &written {
                    state.uploads.remove(&stored.path).await;
                }
                return Err(e);
            }
        }
    }

    if uploaded.is_empty() {
        return Err(AppError::InvalidInput("No valid Excel files uploaded".to_string()));
    }

    tracing::info!("Stored {} files in {:?}", uploaded.len(), start.elapsed());
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "Files uploaded successfully".to_string(),
            files: uploaded,
        }),
    ))
}

/// Saves, extracts and persists one file. `Ok(None)` means the file had no
/// usable sheet and was removed again.
async fn store_upload(
    state: &AppState,
    owner: &Owner,
    description: &str,
    tags: &[String],
    upload: PendingUpload,
    format: WorkbookFormat,
    written: &mut Vec<StoredFile>,
) -> Result<Option<(FileRecord, UploadedFile)>, AppError> {
    let stored = state.uploads.save(&upload.original_name, &upload.data).await?;
    written.push(stored.clone());

    let extractor = state.extractor;
    let data = upload.data;
    let extracted = tokio::task::spawn_blocking(move || extractor.extract(data, format))
        .await
        .map_err(|e| AppError::Internal(format!("Extraction task failed: {}", e)))?;

    let sheets = match extracted {
        Ok(sheets) => sheets,
        Err(ExtractError::NoValidData) => {
            tracing::warn!("{} has no usable sheet, discarding it", upload.original_name);
            state.uploads.remove(&stored.path).await;
            written.pop();
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let record = state.store.insert(
        NewFile {
            owner: owner.0.clone(),
            filename: stored.filename.clone(),
            original_name: upload.original_name,
            file_path: stored.path.to_string_lossy().into_owned(),
            file_size: stored.size,
            mime_type: upload
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            description: description.to_string(),
            tags: tags.to_vec(),
        },
        &sheets,
    )?;

    let file = UploadedFile::new(&record, &sheets);
    Ok(Some((record, file)))
}

// ---------------------------------------------------------------------------
// File records
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ListResponse {
    files: Vec<FileSummary>,
    pagination: Pagination,
}

async fn list_files(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let (files, total) = state.store.list(&owner.0, &query)?;
    Ok(Json(ListResponse {
        files,
        pagination: Pagination::new(&query, total),
    }))
}

#[derive(Debug, Serialize)]
pub struct FileResponse {
    file: FileDetail,
}

async fn get_file(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<FileResponse>, AppError> {
    let record = state
        .store
        .record_access(&owner.0, &id)?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
    let sheets = state.store.sheets(&record)?;

    Ok(Json(FileResponse {
        file: FileDetail::new(record, sheets),
    }))
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let record = state
        .store
        .delete(&owner.0, &id)?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;
    state.uploads.remove(std::path::Path::new(&record.file_path)).await;

    Ok(Json(serde_json::json!({ "message": "File deleted successfully" })))
}

/// Attachment header with an ASCII `filename` fallback and an RFC 6266
/// `filename*` carrying the exact UTF-8 name.
fn content_disposition(original_name: &str) -> String {
    let fallback: String = original_name
        .chars()
        .map(|c| {
            if c.is_control() || !c.is_ascii() || c == '"' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect();

    if fallback == original_name {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(original_name)
        )
    }
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = find_file(&state, &owner, &id)?;
    let data = state
        .uploads
        .read(std::path::Path::new(&record.file_path))
        .await?;

    let disposition = content_disposition(&record.original_name);
    Ok((
        [
            (header::CONTENT_TYPE, record.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDataResponse {
    filename: String,
    size: u64,
    upload_date: chrono::DateTime<chrono::Utc>,
    data: Vec<Row>,
}

async fn get_file_data(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<FileDataResponse>, AppError> {
    let record = find_file(&state, &owner, &id)?;
    let sheet = first_sheet(&state, &record)?;

    Ok(Json(FileDataResponse {
        filename: record.original_name,
        size: record.file_size,
        upload_date: record.created_at,
        data: sheet.data,
    }))
}

// ---------------------------------------------------------------------------
// Charts and statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    x_axis: Option<String>,
    y_axis: Option<String>,
    #[serde(default)]
    chart_type: ChartKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartResponse {
    labels: Vec<String>,
    data: Vec<f64>,
    chart_type: ChartKind,
    x_axis: String,
    y_axis: String,
    total_data_points: usize,
}

async fn analyze_chart(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
    Json(request): Json<ChartRequest>,
) -> Result<Json<ChartResponse>, AppError> {
    let (Some(x_axis), Some(y_axis)) = (required(request.x_axis), required(request.y_axis)) else {
        return Err(AppError::InvalidInput("X-Axis and Y-Axis are required".to_string()));
    };

    let record = find_file(&state, &owner, &id)?;
    let sheet = first_sheet(&state, &record)?;
    let series = group_sum(&sheet, &x_axis, &y_axis)?;

    Ok(Json(ChartResponse {
        total_data_points: series.category_count(),
        labels: series.labels,
        data: series.values,
        chart_type: request.chart_type,
        x_axis,
        y_axis,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDataQuery {
    x_column: Option<String>,
    y_column: Option<String>,
    #[serde(default)]
    chart_type: ChartKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDataset {
    label: String,
    data: Vec<f64>,
    background_color: &'static str,
    border_color: &'static str,
    border_width: u32,
}

#[derive(Debug, Serialize)]
pub struct ChartData {
    labels: Vec<String>,
    datasets: Vec<ChartDataset>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    x_column: String,
    y_column: String,
    chart_type: ChartKind,
    total_data_points: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDataResponse {
    chart_data: ChartData,
    metadata: ChartMetadata,
}

async fn chart_data(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path((id, sheet_name)): Path<(String, String)>,
    Query(query): Query<ChartDataQuery>,
) -> Result<Json<ChartDataResponse>, AppError> {
    let record = find_file(&state, &owner, &id)?;
    let sheet = find_sheet(&state, &record, &sheet_name)?;

    let (Some(x_column), Some(y_column)) = (required(query.x_column), required(query.y_column)) else {
        return Err(AppError::InvalidInput("X and Y columns are required".to_string()));
    };
    let series = group_sum(&sheet, &x_column, &y_column)?;
    let total_data_points = series.category_count();

    Ok(Json(ChartDataResponse {
        chart_data: ChartData {
            labels: series.labels,
            datasets: vec![ChartDataset {
                label: y_column.clone(),
                data: series.values,
                background_color: DATASET_BACKGROUND,
                border_color: DATASET_BORDER,
                border_width: 1,
            }],
        },
        metadata: ChartMetadata {
            x_column,
            y_column,
            chart_type: query.chart_type,
            total_data_points,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    column: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AnalyzeResponse {
    Sheet {
        analysis: SheetAnalysis,
    },
    #[serde(rename_all = "camelCase")]
    Column {
        sheet_name: String,
        column: String,
        stats: Option<ColumnSummary>,
    },
}

async fn analyze_sheet(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path((id, sheet_name)): Path<(String, String)>,
    Query(query): Query<AnalyzeQuery>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let record = find_file(&state, &owner, &id)?;
    let sheet = find_sheet(&state, &record, &sheet_name)?;

    let column = required(query.column);
    let response = tokio::task::spawn_blocking(move || -> Result<AnalyzeResponse, AppError> {
        Ok(match column {
            Some(column) => {
                let stats = SheetAnalyzer.describe(&sheet, &column)?;
                AnalyzeResponse::Column {
                    sheet_name: sheet.name,
                    column,
                    stats,
                }
            }
            None => AnalyzeResponse::Sheet {
                analysis: SheetAnalyzer.analyze(&sheet),
            },
        })
    })
    .await
    .map_err(|e| AppError::Internal(format!("Analysis task failed: {}", e)))??;
    Ok(Json(response))
}
