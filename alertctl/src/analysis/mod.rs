//! The request-analysis pipeline.
//!
//! [`AnalysisOrchestrator`] drives one alert through
//! `RECEIVED → RETRIEVING → GENERATING → COMPLETED`, with two alternate
//! terminal edges: retrieval failure degrades to no-context generation
//! (`RETRIEVING → GENERATING(no-context)`), and generation failure ends the
//! request (`GENERATING → FAILED`). The whole walk runs under a wall-clock
//! budget; exceeding it abandons whatever is in flight.
//!
//! Every terminal outcome - success, typed failure, validation rejection -
//! enqueues exactly one analytics record. Recording is best-effort and can
//! never displace the analysis outcome itself.

pub mod generation;
pub mod log_context;
pub mod retrieval;

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::analytics::{MetricsStore, NewMetricsRecord};
use crate::analysis::generation::{GenerationError, ResponseGenerator};
use crate::analysis::log_context::LogContext;
use crate::analysis::retrieval::Retriever;
use crate::config::{Config, LogPayloadConfig, PipelineConfig};
use crate::errors::{Error, Result};

/// One submitted alert. Immutable for the duration of the call.
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub alert_text: String,
    pub log_payload: Option<serde_json::Value>,
}

/// A retrieved guidance snippet with provenance, most relevant first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetrievedPassage {
    pub title: Option<String>,
    pub url: Option<String>,
    pub snippet: String,
    pub score: f64,
}

/// Machine-usable breakdown of the remediation answer, parsed
/// opportunistically from the model output.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StructuredRemediation {
    pub incident_type: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

/// The full answer for one alert. Returned to the caller, never persisted
/// verbatim - only metrics about it are.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub alert: String,
    pub context: String,
    /// Markdown-formatted remediation steps
    pub response: String,
    pub sources: Vec<RetrievedPassage>,
    pub structured: Option<StructuredRemediation>,
}

/// Coordinates retrieval and generation under one latency budget, and owns
/// the per-request analytics write.
pub struct AnalysisOrchestrator {
    retriever: Retriever,
    generator: ResponseGenerator,
    store: MetricsStore,
    pipeline: PipelineConfig,
    log_payload: LogPayloadConfig,
    top_k: usize,
}

impl AnalysisOrchestrator {
    pub fn new(retriever: Retriever, generator: ResponseGenerator, store: MetricsStore, config: &Config) -> Self {
        Self {
            retriever,
            generator,
            store,
            pipeline: config.pipeline.clone(),
            log_payload: config.log_payload.clone(),
            top_k: config.retrieval.top_k,
        }
    }

    /// Analyze one alert.
    ///
    /// Degrades gracefully: retrieval failure falls back to empty-context
    /// generation; only validation, generation and budget failures surface.
    #[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
    pub async fn analyze(&self, request: AlertRequest) -> Result<AnalysisResult> {
        let started = Instant::now();

        let alert_text = request.alert_text.trim();
        if alert_text.is_empty() {
            let err = Error::Validation {
                message: "alertText is required".to_string(),
            };
            self.record_outcome(&request, started, None, Some(&err));
            return Err(err);
        }
        let alert_text = alert_text.to_string();

        let mut num_sources: Option<i64> = None;
        let budget = self.pipeline.budget;
        let outcome = match tokio::time::timeout(budget, self.run_stages(&request, &alert_text, &mut num_sources)).await {
            Ok(outcome) => outcome,
            // In-flight stage futures are dropped here, not awaited out.
            Err(_) => Err(Error::BudgetExceeded {
                budget_ms: budget.as_millis() as u64,
            }),
        };

        match &outcome {
            Ok(result) => {
                info!(
                    latency_ms = started.elapsed().as_millis() as u64,
                    num_sources = result.sources.len(),
                    "Analysis completed"
                );
                self.record_outcome(&request, started, Some(result.sources.len() as i64), None);
            }
            Err(err) => {
                warn!(
                    latency_ms = started.elapsed().as_millis() as u64,
                    kind = err.kind(),
                    "Analysis failed"
                );
                self.record_outcome(&request, started, num_sources, Some(err));
            }
        }

        outcome
    }

    async fn run_stages(
        &self,
        request: &AlertRequest,
        alert_text: &str,
        num_sources: &mut Option<i64>,
    ) -> Result<AnalysisResult> {
        let log_context = LogContext::build(request.log_payload.as_ref(), &self.log_payload);

        // RETRIEVING. Failure here is absorbed: availability beats
        // completeness, so the pipeline continues with an empty context.
        let query = if log_context.has_indicators() {
            format!("{alert_text} {}", log_context.indicators)
        } else {
            alert_text.to_string()
        };

        let passages = match tokio::time::timeout(
            self.pipeline.retrieval_timeout,
            self.retriever.retrieve(&query, self.top_k),
        )
        .await
        {
            Ok(Ok(passages)) => passages,
            Ok(Err(err)) => {
                warn!(error = %err, "Retrieval failed, continuing without context");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.pipeline.retrieval_timeout.as_millis() as u64,
                    "Retrieval timed out, continuing without context"
                );
                Vec::new()
            }
        };
        *num_sources = Some(passages.len() as i64);

        // GENERATING. One call, plus at most one policy-gated retry.
        let first = self.generate_once(request, &log_context, &passages).await;
        let generated = match first {
            Err(err) if self.pipeline.retry_generation && err.is_retryable() => {
                info!(error = %err, "Retrying generation once");
                self.generate_once(request, &log_context, &passages).await
            }
            other => other,
        };

        generated.map_err(Error::from)
    }

    async fn generate_once(
        &self,
        request: &AlertRequest,
        log_context: &LogContext,
        passages: &[RetrievedPassage],
    ) -> std::result::Result<AnalysisResult, GenerationError> {
        match tokio::time::timeout(
            self.pipeline.generation_timeout,
            self.generator.generate(request, log_context, passages),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout),
        }
    }

    /// Enqueue the analytics record for a terminal outcome. Best-effort:
    /// the store logs and counts its own failures.
    fn record_outcome(&self, request: &AlertRequest, started: Instant, num_sources: Option<i64>, error: Option<&Error>) {
        self.store.record(NewMetricsRecord {
            ts: Utc::now(),
            alert_text: request.alert_text.clone(),
            success: error.is_none(),
            latency_ms: started.elapsed().as_millis() as i64,
            error: error.map(|e| format!("{}: {}", e.kind(), e.user_message())),
            top_k: Some(self.top_k as i64),
            num_sources,
        });
    }
}
