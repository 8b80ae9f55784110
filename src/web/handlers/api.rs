use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::envelope::{Envelope, EnvelopeError};
use crate::render::{render, RenderedOutput};
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub warehouse_backend: String,
    pub allowed_tables: Vec<String>,
    pub example_count: usize,
}

/// One free-text question in, one rendered result out.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<Response, (StatusCode, String)> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question is empty".to_string()));
    }

    info!("Question: {}", question);
    let start_time = Instant::now();

    let raw_response = state.agent.run(question).await.map_err(|e| {
        error!("Agent run failed: {}", e);
        (StatusCode::BAD_GATEWAY, format!("Agent error: {}", e))
    })?;

    let envelope = Envelope::parse(&raw_response).map_err(|e| {
        error!("Model response failed envelope validation: {}", e);
        let status = match e {
            EnvelopeError::UnknownKind(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_GATEWAY,
        };
        (status, format!("Malformed model response: {}", e))
    })?;

    let output: RenderedOutput = render(envelope).map_err(|e| {
        error!("Render failed: {}", e);
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Render error: {}", e),
        )
    })?;

    let elapsed_ms = start_time.elapsed().as_millis() as u64;
    info!("Question answered in {}ms", elapsed_ms);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(v) = HeaderValue::from_str(&elapsed_ms.to_string()) {
        headers.insert(HeaderName::from_static("x-elapsed-ms"), v);
    }

    Ok((StatusCode::OK, headers, Json(output)).into_response())
}

/// Allow-listed warehouse tables.
pub async fn list_tables(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    let tables = state.warehouse.list_tables().await.map_err(|e| {
        error!("Failed to list tables: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{}", e))
    })?;

    Ok(Json(tables))
}

// System status
pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, (StatusCode, String)> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        warehouse_backend: state.config.warehouse.backend.clone(),
        allowed_tables: state.config.warehouse.include_tables.clone(),
        example_count: state.example_count,
    }))
}
