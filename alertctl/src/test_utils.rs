//! Test doubles for the pipeline's capability seams, plus app builders.
//!
//! Everything here swaps in at the `EmbeddingProvider` / `VectorIndex` /
//! `ChatModel` traits so pipeline and API tests run without the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::analysis::generation::{ChatModel, GenerationError, ResponseGenerator};
use crate::analysis::retrieval::{EmbeddingProvider, IndexMatch, RetrievalError, Retriever, VectorIndex};
use crate::analysis::AnalysisOrchestrator;
use crate::analytics::MetricsStore;
use crate::{build_router, AppState, BackgroundServices, Config};

/// Always returns the same small embedding.
pub struct StaticEmbeddings;

#[async_trait]
impl EmbeddingProvider for StaticEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(vec![0.1; 8])
    }
}

/// Returns a fixed set of index matches.
pub struct StaticIndex {
    pub matches: Vec<IndexMatch>,
}

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, RetrievalError> {
        Ok(self.matches.iter().take(top_k).cloned().collect())
    }
}

/// Simulates an index outage.
pub struct FailingIndex;

#[async_trait]
impl VectorIndex for FailingIndex {
    async fn query(&self, _vector: &[f32], _top_k: usize) -> Result<Vec<IndexMatch>, RetrievalError> {
        Err(RetrievalError::Index {
            message: "connection refused".to_string(),
        })
    }
}

/// Always returns the same completion content.
pub struct StaticChat {
    pub content: String,
}

#[async_trait]
impl ChatModel for StaticChat {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, GenerationError> {
        Ok(self.content.clone())
    }
}

/// Always fails with the given error.
pub struct FailingChat {
    pub error: GenerationError,
}

#[async_trait]
impl ChatModel for FailingChat {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, GenerationError> {
        Err(self.error.clone())
    }
}

/// Sleeps before answering - for budget/timeout tests.
pub struct SlowChat {
    pub delay: Duration,
    pub content: String,
}

#[async_trait]
impl ChatModel for SlowChat {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, GenerationError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.content.clone())
    }
}

/// Fails the first call, succeeds afterwards - for retry tests.
pub struct FlakyChat {
    error: GenerationError,
    content: String,
    calls: AtomicUsize,
}

impl FlakyChat {
    pub fn new(error: GenerationError, content: String) -> Self {
        Self {
            error,
            content,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for FlakyChat {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, GenerationError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(self.error.clone())
        } else {
            Ok(self.content.clone())
        }
    }
}

/// Build an orchestrator over mock dependencies, with a config tweak hook.
pub fn orchestrator_with(
    store: MetricsStore,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatModel>,
    tweak: impl FnOnce(&mut Config),
) -> AnalysisOrchestrator {
    let mut config = Config::default();
    tweak(&mut config);

    let retriever = Retriever::new(Arc::new(StaticEmbeddings), index, config.retrieval.snippet_max_chars);
    let generator = ResponseGenerator::new(chat);
    AnalysisOrchestrator::new(retriever, generator, store, &config)
}

/// Build a full test server over mock dependencies.
///
/// Returns the store handle so tests can flush and inspect the analytics
/// log, and the background services so the writer is shut down cleanly.
pub async fn create_test_app(
    pool: SqlitePool,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatModel>,
) -> (axum_test::TestServer, MetricsStore, BackgroundServices) {
    let config = Config::default();

    let shutdown_token = CancellationToken::new();
    let drop_guard = shutdown_token.clone().drop_guard();

    let (store, writer) = MetricsStore::new(pool.clone(), &config.analytics);
    let writer_task = tokio::spawn(writer.run(shutdown_token.clone()));

    let orchestrator = Arc::new(orchestrator_with(store.clone(), index, chat, |_| {}));

    let state = AppState {
        db: pool,
        config,
        store: store.clone(),
        orchestrator,
    };
    let router = build_router(&state).expect("Failed to build router");
    let server = axum_test::TestServer::new(router).expect("Failed to create test server");

    (
        server,
        store,
        BackgroundServices {
            writer_task,
            shutdown_token,
            drop_guard: Some(drop_guard),
        },
    )
}

/// A realistic guidance passage match for fixtures.
pub fn guidance_match(title: &str, score: f64) -> IndexMatch {
    IndexMatch {
        title: Some(title.to_string()),
        url: Some(format!("https://example.com/{}", title.to_lowercase().replace(' ', "-"))),
        text: Some(format!("{title} describes the relevant containment and recovery guidance.")),
        score,
    }
}
