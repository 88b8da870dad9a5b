//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `ALERTCTL_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `ALERTCTL_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `ALERTCTL_GENERATION__MODEL=gpt-4o-mini` sets the `generation.model` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! ALERTCTL_PORT=8080
//!
//! # Point at the metrics database
//! DATABASE_URL="sqlite://data/alertctl.db"
//!
//! # Credentials for the external dependencies
//! ALERTCTL_GENERATION__API_KEY="sk-..."
//! ALERTCTL_RETRIEVAL__INDEX_API_KEY="pc-..."
//! ```

use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "ALERTCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Convenience override for `database.url` (set via DATABASE_URL)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Metrics database configuration
    pub database: DatabaseConfig,
    /// Generation model (chat completions) configuration
    pub generation: GenerationConfig,
    /// Retrieval configuration (embeddings + vector index)
    pub retrieval: RetrievalConfig,
    /// Analysis pipeline policy (budget, per-stage timeouts, retry)
    pub pipeline: PipelineConfig,
    /// Analytics write-path configuration
    pub analytics: AnalyticsConfig,
    /// Bounds applied to uploaded log payloads before prompt inclusion
    pub log_payload: LogPayloadConfig,
    /// CORS configuration for the HTTP API
    pub cors: CorsConfig,
}

/// Metrics database settings.
///
/// The analytics log lives in SQLite so a single binary carries its own
/// durable store; point `url` at a shared volume in multi-instance setups.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite connection string (the file is created if missing)
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://alertctl.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Settings for the generation model dependency.
///
/// Any OpenAI-compatible chat-completions endpoint works; `base_url` should
/// include the `/v1` segment (e.g. `https://api.openai.com/v1`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// Base URL of the chat-completions API
    pub base_url: Url,
    /// Bearer token for the generation API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model identifier passed in the request body
    pub model: String,
    /// Upper bound on generated tokens per request
    pub max_tokens: u32,
    /// Sampling temperature (kept low - remediation steps should be boring)
    pub temperature: f32,
    /// HTTP client timeout for a single generation call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://api.openai.com/v1").expect("valid default URL"),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.2,
            timeout: Duration::from_secs(20),
        }
    }
}

/// Settings for the retrieval dependencies (embeddings + vector index).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Base URL of the vector index (query endpoint is `{index_url}/query`)
    pub index_url: Url,
    /// API key sent to the vector index in the `Api-Key` header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_api_key: Option<String>,
    /// Base URL of the embeddings API (OpenAI-compatible)
    pub embeddings_base_url: Url,
    /// Bearer token for the embeddings API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings_api_key: Option<String>,
    /// Embedding model identifier
    pub embedding_model: String,
    /// Number of passages requested from the index per query
    pub top_k: usize,
    /// Upper bound on passage snippet length returned to clients
    pub snippet_max_chars: usize,
    /// HTTP client timeout shared by the embedding and index calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_url: Url::parse("http://localhost:6333").expect("valid default URL"),
            index_api_key: None,
            embeddings_base_url: Url::parse("https://api.openai.com/v1").expect("valid default URL"),
            embeddings_api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            top_k: 3,
            snippet_max_chars: 400,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Analysis pipeline policy.
///
/// `budget` caps the combined retrieval + generation wall clock; the
/// per-stage timeouts bound each dependency individually so one slow
/// dependency cannot starve the other.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Overall wall-clock budget for one analyze call
    #[serde(with = "humantime_serde")]
    pub budget: Duration,
    /// Timeout for the retrieval stage (embedding + index query)
    #[serde(with = "humantime_serde")]
    pub retrieval_timeout: Duration,
    /// Timeout for a single generation call
    #[serde(with = "humantime_serde")]
    pub generation_timeout: Duration,
    /// Allow one bounded retry of a retryably-failed generation call
    pub retry_generation: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(45),
            retrieval_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(20),
            retry_generation: true,
        }
    }
}

/// Analytics write-path configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Bounded queue capacity between request handlers and the writer.
    /// Records are dropped (and counted) once the queue is full.
    /// Default: 10000
    pub queue_capacity: usize,
    /// Maximum number of records to write in a single batch.
    /// At high load, records queue while writing, naturally forming larger batches.
    /// Default: 100
    pub batch_size: usize,
    /// Maximum number of retry attempts for failed batch writes.
    /// After all retries are exhausted, the batch is dropped and an error is logged.
    /// Default: 3
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff between retries.
    /// Actual delay is: base_delay * 2^attempt (e.g., 100ms, 200ms, 400ms for base=100).
    /// Default: 100
    pub retry_base_delay_ms: u64,
    /// Stored alert text is truncated to this many characters
    pub alert_text_max_chars: usize,
    /// Stored error classifications are truncated to this many characters
    pub error_max_chars: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            max_retries: 3,
            retry_base_delay_ms: 100,
            alert_text_max_chars: 500,
            error_max_chars: 500,
        }
    }
}

/// Bounds applied to uploaded log payloads before they are rendered into
/// the generation prompt. Payloads are arbitrary client JSON; anything
/// beyond these limits is elided, never forwarded.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogPayloadConfig {
    /// Maximum nesting depth rendered into the prompt
    pub max_depth: usize,
    /// Maximum number of values (scalars, array items, map entries) rendered
    pub max_nodes: usize,
    /// Maximum length of a single rendered string value
    pub max_string_chars: usize,
    /// Overall cap on the rendered digest
    pub max_chars: usize,
}

impl Default for LogPayloadConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_nodes: 200,
            max_string_chars: 256,
            max_chars: 2000,
        }
    }
}

/// CORS configuration for the HTTP API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        // Dev dashboard origins; restrict further in production deployments.
        Self {
            allowed_origins: vec![
                CorsOrigin::Url(Url::parse("http://localhost:5173").expect("valid default URL")),
                CorsOrigin::Url(Url::parse("http://127.0.0.1:5173").expect("valid default URL")),
            ],
            allow_credentials: true,
            max_age: None,
        }
    }
}

/// A CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: None,
            database: DatabaseConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            pipeline: PipelineConfig::default(),
            analytics: AnalyticsConfig::default(),
            log_payload: LogPayloadConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Config {
    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("ALERTCTL_").split("__"))
            // Common DATABASE_URL pattern
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // if database_url is set, use it (preserving pool settings)
        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Socket address string the server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.retrieval.top_k < 1 {
            return Err(Error::Internal {
                operation: "Config validation: retrieval.top_k must be at least 1".to_string(),
            });
        }

        if self.analytics.batch_size < 1 {
            return Err(Error::Internal {
                operation: "Config validation: analytics.batch_size must be at least 1".to_string(),
            });
        }

        if self.analytics.queue_capacity < self.analytics.batch_size {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: analytics.queue_capacity ({}) must be >= analytics.batch_size ({})",
                    self.analytics.queue_capacity, self.analytics.batch_size
                ),
            });
        }

        if self.pipeline.budget < self.pipeline.generation_timeout {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: pipeline.budget ({:?}) must be >= pipeline.generation_timeout ({:?})",
                    self.pipeline.budget, self.pipeline.generation_timeout
                ),
            });
        }

        if self.log_payload.max_depth < 1 || self.log_payload.max_nodes < 1 {
            return Err(Error::Internal {
                operation: "Config validation: log_payload.max_depth and max_nodes must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}
