use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use takeoff_core::{
    export_bytes, format_total, parse_table, recompute, CalcMode, ExportFormat, RowInput,
    TakeoffError, TakeoffTable,
};
use tracing::{info, warn};
use uuid::Uuid;
use vision_takeoff::{DrawingImage, GeminiClient, GeminiError, TakeoffRequest};

use crate::session::Session;
use crate::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// The unparsed model reply, when that is what went wrong
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: message.into(),
            raw: None,
        }),
    )
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// JPG/PNG drawing, base64 with or without a data URI prefix
    pub image_base64: String,
    #[serde(default)]
    pub rules: String,
    #[serde(default)]
    pub mode: CalcMode,
    /// Caller's own key; the server key is used when absent
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub session_id: Uuid,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub total_display: String,
    pub table: TakeoffTable,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub model: String,
    pub rules: String,
    pub created_at: String,
    pub updated_at: String,
    pub total_display: String,
    pub table: TakeoffTable,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.id,
            model: session.model,
            rules: session.rules,
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
            total_display: format_total(session.table.total),
            table: session.table,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TableResponse {
    pub total_display: String,
    pub table: TakeoffTable,
}

impl From<TakeoffTable> for TableResponse {
    fn from(table: TakeoffTable) -> Self {
        Self {
            total_display: format_total(table.total),
            table,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecomputeRequest {
    pub rows: Vec<RowInput>,
    #[serde(default)]
    pub mode: CalcMode,
}

#[derive(Debug, Deserialize)]
pub struct EditRowsRequest {
    pub rows: Vec<RowInput>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeModeRequest {
    pub mode: CalcMode,
}

pub async fn analyze_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    info!("Received takeoff request ({} mode)", payload.mode.label());

    let api_key = payload
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| state.default_api_key.clone())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                "MISSING_API_KEY",
                "An API key is required: send api_key or configure GOOGLE_API_KEY",
            )
        })?;

    // Decoding and downscaling is CPU work; keep it off the async workers
    let image_b64 = payload.image_base64;
    let image = tokio::task::spawn_blocking(move || DrawingImage::from_base64(&image_b64))
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "IMAGE_TASK_FAILED",
                format!("Image decoding task failed: {}", e),
            )
        })?
        .map_err(|e| {
            warn!("Rejected drawing: {:#}", e);
            api_error(StatusCode::BAD_REQUEST, "INVALID_IMAGE", format!("{:#}", e))
        })?;

    let client = GeminiClient::new(api_key, state.gemini.clone());
    let request = TakeoffRequest {
        image,
        rules: payload.rules.clone(),
        mode: payload.mode,
        model: payload.model,
    };

    let analysis = client.analyze(&request).await.map_err(model_error)?;

    let table = parse_table(&analysis.text, payload.mode).map_err(|e| match e {
        TakeoffError::MalformedReply { reason, raw } => {
            warn!("Model reply could not be parsed: {}", reason);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: "MALFORMED_REPLY".to_string(),
                    message: format!("The model reply could not be parsed: {}", reason),
                    raw: Some(raw),
                }),
            )
        }
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, "PARSE_FAILED", other.to_string()),
    })?;

    let message = table
        .is_empty()
        .then(|| "The model recognised no items matching the rules".to_string());

    let session = Session::new(payload.rules, analysis.model.clone(), analysis.text, table.clone());
    let session_id = state.sessions.insert(session).await;

    info!(
        "Session {} created with {} rows (total {})",
        session_id,
        table.len(),
        format_total(table.total)
    );

    Ok(Json(AnalyzeResponse {
        session_id,
        model: analysis.model,
        message,
        total_display: format_total(table.total),
        table,
    }))
}

fn model_error(err: anyhow::Error) -> ApiError {
    warn!("Model call failed: {:#}", err);
    match err.downcast_ref::<GeminiError>() {
        Some(e) if e.is_auth() => api_error(
            StatusCode::UNAUTHORIZED,
            "INVALID_API_KEY",
            format!("The API key was rejected: {}", e),
        ),
        Some(e) if e.is_unsupported_model() => api_error(
            StatusCode::BAD_GATEWAY,
            "MODEL_UNAVAILABLE",
            format!("{:#}", err),
        ),
        _ => api_error(StatusCode::BAD_GATEWAY, "MODEL_ERROR", format!("{:#}", err)),
    }
}

pub async fn recompute_handler(Json(payload): Json<RecomputeRequest>) -> Json<TableResponse> {
    info!("Stateless recompute of {} rows", payload.rows.len());
    Json(recompute(&payload.rows, payload.mode).into())
}

fn session_not_found(id: &Uuid) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        "SESSION_NOT_FOUND",
        format!("No session {}", id),
    )
}

pub async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.sessions.get(&id).await.ok_or_else(|| session_not_found(&id))?;
    Ok(Json(session.into()))
}

pub async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.sessions.remove(&id).await.ok_or_else(|| session_not_found(&id))?;
    info!("Session {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn edit_rows_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<EditRowsRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    info!("Session {}: applying {} edited rows", id, payload.rows.len());
    let session = state
        .sessions
        .update_table(&id, |table| table.apply_edits(payload.rows))
        .await
        .ok_or_else(|| session_not_found(&id))?;
    Ok(Json(session.into()))
}

pub async fn change_mode_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangeModeRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    info!("Session {}: switching to {} mode", id, payload.mode.label());
    let session = state
        .sessions
        .update_table(&id, |table| table.recompute_with(payload.mode))
        .await
        .ok_or_else(|| session_not_found(&id))?;
    Ok(Json(session.into()))
}

pub async fn export_handler(
    State(state): State<AppState>,
    Path((id, format)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let format = match format.to_ascii_lowercase().as_str() {
        "csv" => ExportFormat::Csv,
        "xlsx" => ExportFormat::Xlsx,
        other => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "UNSUPPORTED_FORMAT",
                format!("Unsupported export format: {} (csv or xlsx)", other),
            ))
        }
    };

    let session = state.sessions.get(&id).await.ok_or_else(|| session_not_found(&id))?;
    let bytes = export_bytes(&session.table, format).map_err(|e| {
        warn!("Export failed: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "EXPORT_FAILED", e.to_string())
    })?;

    info!("Session {}: exported {} bytes as {}", id, bytes.len(), format.file_name());

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", format.file_name()),
            ),
        ],
        bytes,
    ))
}
