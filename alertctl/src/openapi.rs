//! OpenAPI document for the HTTP API.

use utoipa::OpenApi;

use crate::analysis::{RetrievedPassage, StructuredRemediation};
use crate::analytics::{MetricsRecord, MetricsSummary};
use crate::api;
use crate::api::models::{AnalyzeRequest, AnalyzeResponse};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "alertctl API",
        description = "Incident-response copilot: retrieval-grounded remediation for security alerts, with request analytics."
    ),
    paths(
        api::handlers::analyze::analyze,
        api::handlers::metrics::list_metrics,
        api::handlers::metrics::metrics_summary,
    ),
    components(schemas(
        AnalyzeRequest,
        AnalyzeResponse,
        RetrievedPassage,
        StructuredRemediation,
        MetricsRecord,
        MetricsSummary,
    )),
    tags(
        (name = "analysis", description = "Alert analysis pipeline"),
        (name = "metrics", description = "Request analytics"),
    )
)]
pub struct ApiDoc;
