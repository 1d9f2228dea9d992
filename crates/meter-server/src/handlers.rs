//! Route handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use tracing::{error, info};

use crate::types::{ApiError, HealthResponse, OcrRequest, OcrResponse};
use crate::AppState;

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Run field extraction for the image named in the request body.
///
/// The pipeline blocks on network and model inference, so it runs on the
/// blocking pool. When the request timeout expires the client gets a 500;
/// the worker is left to finish on its own.
pub async fn ocr(
    State(state): State<AppState>,
    payload: Result<Json<OcrRequest>, JsonRejection>,
) -> Result<Json<OcrResponse>, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e.body_text())))?;

    let image_url = request
        .image_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Image URL is required"))?;

    info!("OCR request for {}", image_url);

    let pipeline = state.pipeline.clone();
    let task = tokio::task::spawn_blocking(move || pipeline.run(&image_url));

    let report = match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => {
            error!("OCR worker failed: {}", e);
            return Err(ApiError::internal("OCR worker failed"));
        }
        Err(_) => {
            error!("OCR request timed out after {:?}", state.request_timeout);
            return Err(ApiError::internal(format!(
                "Request timed out after {:?}",
                state.request_timeout
            )));
        }
    };

    info!(
        "Extracted {} fields from {} detections in {}ms",
        report.fields.len(),
        report.detections,
        report.processing_time_ms
    );

    Ok(Json(OcrResponse {
        fields: report.fields,
    }))
}
