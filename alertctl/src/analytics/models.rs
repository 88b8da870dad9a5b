//! Analytics record and summary types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// One persisted analyze-request outcome.
///
/// Rows are append-only: the core never mutates or deletes them, and the
/// assigned `id` is strictly increasing in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct MetricsRecord {
    pub id: i64,
    pub ts: DateTime<Utc>,
    /// Alert text as submitted, truncated for storage
    pub alert_text: String,
    pub success: bool,
    pub latency_ms: i64,
    /// Short error classification, present only for failed requests
    pub error: Option<String>,
    /// Configured top-K at the time of the request
    pub top_k: Option<i64>,
    /// Number of passages actually retrieved (0 after a no-context fallback)
    pub num_sources: Option<i64>,
}

/// A not-yet-persisted outcome, produced by the orchestrator.
///
/// The identifier is assigned by the database at write time.
#[derive(Debug, Clone)]
pub struct NewMetricsRecord {
    pub ts: DateTime<Utc>,
    pub alert_text: String,
    pub success: bool,
    pub latency_ms: i64,
    pub error: Option<String>,
    pub top_k: Option<i64>,
    pub num_sources: Option<i64>,
}

/// Rolling statistics over the most recent window of records.
///
/// Derived on demand, never stored. With an empty window every field is
/// reported as zero - the documented neutral convention.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MetricsSummary {
    pub count: i64,
    /// Fraction of successful requests in the window, in `[0, 1]`
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    /// 95th percentile latency, nearest-rank method (see [`store`](super::store))
    pub p95_latency_ms: f64,
}

impl MetricsSummary {
    pub fn empty() -> Self {
        Self {
            count: 0,
            success_rate: 0.0,
            avg_latency_ms: 0.0,
            p95_latency_ms: 0.0,
        }
    }
}
