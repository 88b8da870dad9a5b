//! The analyze endpoint.

use axum::{extract::State, response::Json};

use crate::{
    analysis::AlertRequest,
    api::models::{AnalyzeRequest, AnalyzeResponse},
    errors::Error,
    AppState,
};

/// Analyze a security alert
///
/// Runs the full pipeline: retrieves relevant guidance passages, generates a
/// grounded remediation response, and records the outcome in the analytics
/// log. Retrieval failures degrade to an answer without sources rather than
/// failing the request.
#[utoipa::path(
    post,
    path = "/api/v1/analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Grounded remediation response", body = AnalyzeResponse),
        (status = 400, description = "Empty alert text"),
        (status = 502, description = "Generation dependency failed"),
        (status = 504, description = "Analysis exceeded its latency budget"),
    ),
    tag = "analysis",
)]
#[tracing::instrument(skip_all)]
pub async fn analyze(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, Error> {
    let result = state
        .orchestrator
        .analyze(AlertRequest {
            alert_text: payload.alert_text,
            log_payload: payload.log_payload,
        })
        .await?;

    Ok(Json(AnalyzeResponse::from(result)))
}
