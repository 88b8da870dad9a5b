//! Guidance retrieval: one query embedding, one nearest-neighbor index query.
//!
//! Both external calls sit behind capability traits ([`EmbeddingProvider`],
//! [`VectorIndex`]) so the pipeline is testable without the network and the
//! index product is swappable. The concrete implementations speak the
//! OpenAI-compatible `/embeddings` API and a Pinecone-style `/query` wire
//! format over reqwest.
//!
//! Retrieval is stateless and safe for concurrent use; every failure mode
//! here is non-fatal to the caller (the orchestrator degrades to no-context
//! generation).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error as ThisError;
use tracing::debug;
use url::Url;

use crate::analysis::RetrievedPassage;
use crate::config::RetrievalConfig;

/// Retrieval dependency failures. All non-fatal to the analyze call.
#[derive(ThisError, Debug, Clone)]
pub enum RetrievalError {
    #[error("invalid retrieval query: {reason}")]
    InvalidQuery { reason: String },

    #[error("embedding call failed: {message}")]
    Embedding { message: String },

    #[error("vector index query failed: {message}")]
    Index { message: String },
}

/// Capability: turn text into a query embedding.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// A raw nearest-neighbor match as returned by the index.
#[derive(Debug, Clone, Default)]
pub struct IndexMatch {
    pub title: Option<String>,
    pub url: Option<String>,
    pub text: Option<String>,
    pub score: f64,
}

/// Capability: nearest-neighbor search over an already-populated index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, RetrievalError>;
}

/// OpenAI-compatible `/embeddings` client.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
}

impl OpenAiEmbeddings {
    pub fn new(client: reqwest::Client, config: &RetrievalConfig) -> Self {
        Self {
            client,
            base_url: config.embeddings_base_url.clone(),
            api_key: config.embeddings_api_key.clone(),
            model: config.embedding_model.clone(),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let url = join_path(&self.base_url, "embeddings");
        let payload = json!({
            "model": self.model,
            "input": text,
        });

        let mut request = self.client.post(url).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await.map_err(|e| RetrievalError::Embedding {
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Embedding {
                message: format!("HTTP {status}"),
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| RetrievalError::Embedding {
            message: format!("unparseable response: {e}"),
        })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RetrievalError::Embedding {
                message: "response contained no embedding".to_string(),
            })
    }
}

/// HTTP vector index client (Pinecone-style `/query` endpoint).
pub struct HttpVectorIndex {
    client: reqwest::Client,
    index_url: Url,
    api_key: Option<String>,
}

impl HttpVectorIndex {
    pub fn new(client: reqwest::Client, config: &RetrievalConfig) -> Self {
        Self {
            client,
            index_url: config.index_url.clone(),
            api_key: config.index_api_key.clone(),
        }
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    #[serde(default)]
    score: f64,
    metadata: Option<MatchMetadata>,
}

#[derive(Deserialize)]
struct MatchMetadata {
    /// Some indexes store provenance under `source`, others under `title`
    source: Option<String>,
    title: Option<String>,
    url: Option<String>,
    text: Option<String>,
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<IndexMatch>, RetrievalError> {
        let url = join_path(&self.index_url, "query");
        let payload = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
        });

        let mut request = self.client.post(url).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.header("Api-Key", api_key);
        }

        let response = request.send().await.map_err(|e| RetrievalError::Index {
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Index {
                message: format!("HTTP {status}"),
            });
        }

        let parsed: QueryResponse = response.json().await.map_err(|e| RetrievalError::Index {
            message: format!("unparseable response: {e}"),
        })?;

        Ok(parsed
            .matches
            .into_iter()
            .map(|m| {
                let metadata = m.metadata.unwrap_or(MatchMetadata {
                    source: None,
                    title: None,
                    url: None,
                    text: None,
                });
                IndexMatch {
                    title: metadata.source.or(metadata.title),
                    url: metadata.url,
                    text: metadata.text,
                    score: m.score,
                }
            })
            .collect())
    }
}

/// The retrieval stage: embed the query, search the index, shape passages.
pub struct Retriever {
    embeddings: std::sync::Arc<dyn EmbeddingProvider>,
    index: std::sync::Arc<dyn VectorIndex>,
    snippet_max_chars: usize,
}

impl Retriever {
    pub fn new(
        embeddings: std::sync::Arc<dyn EmbeddingProvider>,
        index: std::sync::Arc<dyn VectorIndex>,
        snippet_max_chars: usize,
    ) -> Self {
        Self {
            embeddings,
            index,
            snippet_max_chars,
        }
    }

    /// Retrieve up to `top_k` passages relevant to `query`, most relevant
    /// first. An empty result is valid - zero matches is not an error.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidQuery {
                reason: "query must be non-empty".to_string(),
            });
        }
        if top_k < 1 {
            return Err(RetrievalError::InvalidQuery {
                reason: "top_k must be at least 1".to_string(),
            });
        }

        let vector = self.embeddings.embed(query).await?;
        let matches = self.index.query(&vector, top_k).await?;
        debug!(matches = matches.len(), top_k = top_k, "Vector index query completed");

        Ok(matches
            .into_iter()
            .map(|m| RetrievedPassage {
                title: m.title,
                url: m.url,
                snippet: truncate_with_ellipsis(m.text.as_deref().unwrap_or(""), self.snippet_max_chars),
                score: m.score,
            })
            .collect())
    }
}

fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut truncated: String = s.chars().take(max).collect();
        truncated.push_str("...");
        truncated
    }
}

/// Append one path segment to a base URL, tolerating trailing slashes.
pub(crate) fn join_path(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    let mut path = url.path().trim_end_matches('/').to_string();
    path.push('/');
    path.push_str(segment);
    url.set_path(&path);
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn retrieval_config(embeddings_url: &str, index_url: &str) -> RetrievalConfig {
        RetrievalConfig {
            index_url: Url::parse(index_url).unwrap(),
            index_api_key: Some("index-key".to_string()),
            embeddings_base_url: Url::parse(embeddings_url).unwrap(),
            embeddings_api_key: Some("embed-key".to_string()),
            ..RetrievalConfig::default()
        }
    }

    #[test]
    fn join_path_handles_trailing_slash_and_subpaths() {
        let base = Url::parse("https://api.openai.com/v1/").unwrap();
        assert_eq!(join_path(&base, "embeddings").as_str(), "https://api.openai.com/v1/embeddings");

        let base = Url::parse("http://localhost:6333").unwrap();
        assert_eq!(join_path(&base, "query").as_str(), "http://localhost:6333/query");
    }

    #[test]
    fn snippets_are_truncated_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("short", 400), "short");
        let long = "a".repeat(500);
        let truncated = truncate_with_ellipsis(&long, 400);
        assert_eq!(truncated.chars().count(), 403);
        assert!(truncated.ends_with("..."));
    }

    #[tokio::test]
    async fn embeds_and_queries_then_shapes_passages() {
        let embeddings_server = MockServer::start().await;
        let index_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer embed-key"))
            .and(body_partial_json(serde_json::json!({"model": "text-embedding-3-small"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .expect(1)
            .mount(&embeddings_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/query"))
            .and(header("Api-Key", "index-key"))
            .and(body_partial_json(serde_json::json!({"topK": 3, "includeMetadata": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "matches": [
                    {
                        "score": 0.92,
                        "metadata": {
                            "source": "NIST SP 800-61",
                            "url": "https://csrc.nist.gov/publications/sp/800-61",
                            "text": "Incident handling should include preparation, detection, containment, eradication, and recovery."
                        }
                    },
                    {"score": 0.41, "metadata": {"title": "CIS Controls"}}
                ]
            })))
            .expect(1)
            .mount(&index_server)
            .await;

        let config = retrieval_config(&embeddings_server.uri(), &index_server.uri());
        let client = reqwest::Client::new();
        let retriever = Retriever::new(
            Arc::new(OpenAiEmbeddings::new(client.clone(), &config)),
            Arc::new(HttpVectorIndex::new(client, &config)),
            config.snippet_max_chars,
        );

        let passages = retriever.retrieve("brute force ssh", 3).await.expect("retrieve");
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].title.as_deref(), Some("NIST SP 800-61"));
        assert!(passages[0].snippet.contains("containment"));
        assert_eq!(passages[0].score, 0.92);
        // `title` metadata is honored when `source` is absent
        assert_eq!(passages[1].title.as_deref(), Some("CIS Controls"));
        assert_eq!(passages[1].snippet, "");
    }

    #[tokio::test]
    async fn zero_matches_is_a_valid_empty_result() {
        let embeddings_server = MockServer::start().await;
        let index_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.5]}]
            })))
            .mount(&embeddings_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"matches": []})))
            .mount(&index_server)
            .await;

        let config = retrieval_config(&embeddings_server.uri(), &index_server.uri());
        let client = reqwest::Client::new();
        let retriever = Retriever::new(
            Arc::new(OpenAiEmbeddings::new(client.clone(), &config)),
            Arc::new(HttpVectorIndex::new(client, &config)),
            config.snippet_max_chars,
        );

        let passages = retriever.retrieve("unknown topic", 3).await.expect("retrieve");
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn index_outage_maps_to_index_error() {
        let embeddings_server = MockServer::start().await;
        let index_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.5]}]
            })))
            .mount(&embeddings_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&index_server)
            .await;

        let config = retrieval_config(&embeddings_server.uri(), &index_server.uri());
        let client = reqwest::Client::new();
        let retriever = Retriever::new(
            Arc::new(OpenAiEmbeddings::new(client.clone(), &config)),
            Arc::new(HttpVectorIndex::new(client, &config)),
            config.snippet_max_chars,
        );

        let err = retriever.retrieve("anything", 3).await.expect_err("should fail");
        assert!(matches!(err, RetrievalError::Index { .. }));
    }

    #[tokio::test]
    async fn blank_query_is_rejected_before_any_call() {
        let retriever = Retriever::new(
            Arc::new(crate::test_utils::StaticEmbeddings),
            Arc::new(crate::test_utils::StaticIndex { matches: vec![] }),
            400,
        );

        let err = retriever.retrieve("   ", 3).await.expect_err("should fail");
        assert!(matches!(err, RetrievalError::InvalidQuery { .. }));

        let err = retriever.retrieve("query", 0).await.expect_err("should fail");
        assert!(matches!(err, RetrievalError::InvalidQuery { .. }));
    }
}
