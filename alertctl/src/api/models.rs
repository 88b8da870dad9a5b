//! API request/response types.
//!
//! The analyze endpoint speaks camelCase (the dashboard's convention);
//! the metrics endpoints mirror the stored row shape.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::analysis::{AnalysisResult, RetrievedPassage, StructuredRemediation};

/// One alert to analyze, with optional structured log events.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Free-text alert (non-empty after trimming)
    pub alert_text: String,
    /// Arbitrary JSON log export; bounded before any downstream use
    #[serde(default)]
    #[schema(value_type = Object)]
    pub log_payload: Option<serde_json::Value>,
}

/// The grounded remediation answer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnalyzeResponse {
    /// Echo of the submitted alert text
    pub alert: String,
    /// Indicator summary extracted from the log payload
    pub context: String,
    /// Markdown remediation steps for the dashboard
    pub response: String,
    /// Retrieved passages the answer is grounded in, most relevant first
    pub sources: Vec<RetrievedPassage>,
    /// Machine-usable breakdown, when the model supplied one
    pub structured: Option<StructuredRemediation>,
}

impl From<AnalysisResult> for AnalyzeResponse {
    fn from(result: AnalysisResult) -> Self {
        Self {
            alert: result.alert,
            context: result.context,
            response: result.response,
            sources: result.sources,
            structured: result.structured,
        }
    }
}

/// Query parameters for the recent-metrics listing
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ListMetricsQuery {
    /// Maximum number of rows to return (default: 50, max: 500)
    pub limit: Option<i64>,
}

/// Query parameters for the metrics summary
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct MetricsSummaryQuery {
    /// Window size in rows, most recent first (default: 200, max: 2000)
    pub limit: Option<i64>,
}
