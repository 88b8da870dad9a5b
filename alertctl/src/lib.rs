//! # alertctl: Incident-Response Copilot Backend
//!
//! `alertctl` turns a free-text security alert - optionally paired with
//! structured log events - into grounded, step-by-step remediation guidance,
//! and records every request as an analytics event for later aggregation.
//!
//! ## Overview
//!
//! Security teams triage a steady stream of alerts whose remediation steps
//! live scattered across runbooks and reference frameworks (NIST SP 800-61,
//! MITRE ATT&CK, CIS Controls). This crate answers each alert with a
//! retrieval-augmented pipeline: it embeds the alert (plus indicators pulled
//! from any attached logs), queries a vector index of guidance passages, and
//! asks a generation model for a remediation plan grounded in what came back.
//!
//! The pipeline is built to degrade rather than fail. A dead vector index
//! costs the answer its citations, not its existence; only generation
//! failures and the overall latency budget surface to the caller. Every
//! terminal outcome - success or failure - lands exactly once in a durable
//! analytics log that feeds the rolling summaries (count, success rate,
//! average and p95 latency) shown on the dashboard.
//!
//! ### Request Flow
//!
//! A `POST /api/v1/analyze` request is validated, then walked through
//! [`analysis::AnalysisOrchestrator`]: retrieval (embedding + nearest-neighbor
//! query) under its own timeout, generation under its own timeout, all inside
//! one wall-clock budget. The outcome is enqueued on a bounded channel and a
//! background writer batches it into SQLite - the request path never waits on
//! the metrics database. `GET /api/v1/metrics` and
//! `GET /api/v1/metrics/summary` read from the same store.
//!
//! ### Core Components
//!
//! The **analysis layer** ([`analysis`]) owns the pipeline: the retriever and
//! its capability seams ([`analysis::retrieval`]), the prompt builder and
//! model client ([`analysis::generation`]), the bounded log-payload digest
//! ([`analysis::log_context`]) and the orchestrator itself.
//!
//! The **analytics layer** ([`analytics`]) owns the append-only outcome log:
//! a cloneable store handle, a single background writer, and the summary
//! computation with a fixed, documented percentile method.
//!
//! The **API layer** ([`api`]) is a thin axum surface over both, with CORS,
//! request tracing and OpenAPI docs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use alertctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = alertctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     alertctl::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await
//! }
//! ```

pub mod analysis;
pub mod analytics;
pub mod api;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod telemetry;

#[cfg(test)]
mod test;
#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
pub use config::Config;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, info, instrument, Level};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::analysis::generation::{OpenAiChatModel, ResponseGenerator};
use crate::analysis::retrieval::{HttpVectorIndex, OpenAiEmbeddings, Retriever};
use crate::analysis::AnalysisOrchestrator;
use crate::analytics::MetricsStore;
use crate::config::CorsOrigin;
use crate::openapi::ApiDoc;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub store: MetricsStore,
    pub orchestrator: Arc<AnalysisOrchestrator>,
}

/// Wire up the analysis pipeline from configuration.
///
/// Each dependency gets its own HTTP client so per-stage timeouts hold even
/// if a response body stalls mid-transfer.
fn build_orchestrator(config: &Config, store: MetricsStore) -> anyhow::Result<AnalysisOrchestrator> {
    let retrieval_client = reqwest::Client::builder().timeout(config.retrieval.timeout).build()?;
    let generation_client = reqwest::Client::builder().timeout(config.generation.timeout).build()?;

    let retriever = Retriever::new(
        Arc::new(OpenAiEmbeddings::new(retrieval_client.clone(), &config.retrieval)),
        Arc::new(HttpVectorIndex::new(retrieval_client, &config.retrieval)),
        config.retrieval.snippet_max_chars,
    );
    let generator = ResponseGenerator::new(Arc::new(OpenAiChatModel::new(generation_client, &config.generation)));

    Ok(AnalysisOrchestrator::new(retriever, generator, store, config))
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.cors.allow_credentials)
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_headers(tower_http::cors::AllowHeaders::mirror_request());

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/analyze", post(api::handlers::analyze::analyze))
        .route("/metrics", get(api::handlers::metrics::list_metrics))
        .route("/metrics/summary", get(api::handlers::metrics::metrics_summary))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .route(
            "/api-docs/openapi.json",
            get(|| async { axum::response::Json(ApiDoc::openapi()) }),
        );

    let cors_layer = create_cors_layer(&state.config)?;

    let router = router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Container for background services and their lifecycle management.
///
/// Holds the analytics writer task; [`shutdown`](BackgroundServices::shutdown)
/// cancels it and waits for the queue to drain. When dropped, the
/// `drop_guard` cancels the token automatically so nothing leaks in tests.
pub struct BackgroundServices {
    writer_task: tokio::task::JoinHandle<()>,
    shutdown_token: tokio_util::sync::CancellationToken,
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown background tasks, draining pending analytics.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        let _ = self.writer_task.await;
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] opens the metrics database, runs
///    migrations, starts the analytics writer and builds the router
/// 2. **Serve**: [`Application::serve`] binds a TCP port and handles requests
/// 3. **Shutdown**: on the shutdown signal, drains the analytics queue and
///    closes the pool
pub struct Application {
    router: Router,
    config: Config,
    pool: SqlitePool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting incident copilot with configuration: {:#?}", config);

        let pool = db::connect(&config.database).await?;
        db::migrator().run(&pool).await?;

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let drop_guard = shutdown_token.clone().drop_guard();

        let (store, writer) = MetricsStore::new(pool.clone(), &config.analytics);
        let writer_task = tokio::spawn(writer.run(shutdown_token.clone()));

        let orchestrator = Arc::new(build_orchestrator(&config, store.clone())?);

        let state = AppState {
            db: pool.clone(),
            config: config.clone(),
            store,
            orchestrator,
        };
        let router = build_router(&state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services: BackgroundServices {
                writer_task,
                shutdown_token,
                drop_guard: Some(drop_guard),
            },
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Incident copilot listening on http://{}, docs at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        // Drain the analytics queue before letting go of the database.
        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}
