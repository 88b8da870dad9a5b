//! Analytics read endpoints.

use axum::{
    extract::{Query, State},
    response::Json,
};

use crate::{
    analytics::{MetricsRecord, MetricsSummary},
    api::models::{ListMetricsQuery, MetricsSummaryQuery},
    errors::Error,
    AppState,
};

/// List recent analyze requests
///
/// Returns the last N analytics rows, most recent first.
#[utoipa::path(
    get,
    path = "/api/v1/metrics",
    params(ListMetricsQuery),
    responses(
        (status = 200, description = "Recent request records", body = [MetricsRecord]),
        (status = 500, description = "Metrics store error"),
    ),
    tag = "metrics",
)]
#[tracing::instrument(skip_all)]
pub async fn list_metrics(
    Query(query): Query<ListMetricsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<MetricsRecord>>, Error> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let rows = state.store.recent(limit).await?;
    Ok(Json(rows))
}

/// Summarize recent analyze requests
///
/// Count, success rate, average and p95 latency over the last N rows.
/// The percentile uses the nearest-rank method (documented in the
/// analytics store), so values here are reproducible from the raw rows.
#[utoipa::path(
    get,
    path = "/api/v1/metrics/summary",
    params(MetricsSummaryQuery),
    responses(
        (status = 200, description = "Rolling summary statistics", body = MetricsSummary),
        (status = 500, description = "Metrics store error"),
    ),
    tag = "metrics",
)]
#[tracing::instrument(skip_all)]
pub async fn metrics_summary(
    Query(query): Query<MetricsSummaryQuery>,
    State(state): State<AppState>,
) -> Result<Json<MetricsSummary>, Error> {
    let limit = query.limit.unwrap_or(200).clamp(1, 2000);
    let summary = state.store.summarize(limit).await?;
    Ok(Json(summary))
}
