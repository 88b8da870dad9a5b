//! Grounded response generation.
//!
//! Builds a single prompt from the alert, the bounded log digest and the
//! retrieved passages, invokes the chat model exactly once per call (retries
//! belong to the orchestrator) and shapes the output into an
//! [`AnalysisResult`]. A JSON breakdown is parsed opportunistically; plain
//! narrative output is passed through as the markdown response.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error as ThisError;
use tracing::debug;
use url::Url;

use crate::analysis::log_context::LogContext;
use crate::analysis::retrieval::join_path;
use crate::analysis::{AlertRequest, AnalysisResult, RetrievedPassage, StructuredRemediation};
use crate::config::GenerationConfig;

/// Generation dependency failures, kept distinct so the orchestrator can
/// decide retryability per kind.
#[derive(ThisError, Debug, Clone)]
pub enum GenerationError {
    #[error("generation model timed out")]
    Timeout,

    #[error("generation transport error: {message}")]
    Transport { message: String },

    #[error("generation model returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("generation request was rejected by the model's content policy")]
    PolicyRejection,

    #[error("generation model returned empty or unusable output")]
    MalformedOutput,
}

impl GenerationError {
    /// Whether a second attempt has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Timeout | GenerationError::Transport { .. } => true,
            GenerationError::Api { status, .. } => *status == 429 || *status >= 500,
            GenerationError::PolicyRejection | GenerationError::MalformedOutput => false,
        }
    }
}

/// Capability: single-turn chat completion. Returns the raw message content.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError>;
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(client: reqwest::Client, config: &GenerationConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let url = join_path(&self.base_url, "chat/completions");
        let payload = json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let mut request = self.client.post(url).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Transport { message: e.to_string() }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("content_policy") || body.contains("content_filter") {
                return Err(GenerationError::PolicyRejection);
            }
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|_| GenerationError::MalformedOutput)?;

        let choice = parsed.choices.into_iter().next().ok_or(GenerationError::MalformedOutput)?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(GenerationError::PolicyRejection);
        }

        match choice.message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(GenerationError::MalformedOutput),
        }
    }
}

const SYSTEM_PROMPT: &str = "You are a concise cybersecurity incident-response copilot. \
    ALWAYS return valid JSON. No extra text.";

/// The generation stage: prompt assembly, one model call, result shaping.
pub struct ResponseGenerator {
    model: std::sync::Arc<dyn ChatModel>,
}

impl ResponseGenerator {
    pub fn new(model: std::sync::Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Produce an [`AnalysisResult`] for the alert, grounded in `passages`.
    ///
    /// Invokes the model exactly once. An empty passage list is fully
    /// supported - the prompt simply carries no reference documents.
    pub async fn generate(
        &self,
        request: &AlertRequest,
        log_context: &LogContext,
        passages: &[RetrievedPassage],
    ) -> Result<AnalysisResult, GenerationError> {
        let user_prompt = build_user_prompt(&request.alert_text, log_context, passages);
        let content = self.model.complete(SYSTEM_PROMPT, &user_prompt).await?;

        let structured = parse_structured(&content);
        debug!(structured = structured.is_some(), "Generation completed");

        let response = match &structured {
            Some(remediation) => structured_to_markdown(remediation, passages),
            // Narrative output without a parseable breakdown is still an answer.
            None => content.trim().to_string(),
        };

        let context = if log_context.has_indicators() {
            log_context.indicators.clone()
        } else {
            "No structured indicators found".to_string()
        };

        Ok(AnalysisResult {
            alert: request.alert_text.clone(),
            context,
            response,
            sources: passages.to_vec(),
            structured,
        })
    }
}

/// Render the grounded user prompt.
fn build_user_prompt(alert: &str, log_context: &LogContext, passages: &[RetrievedPassage]) -> String {
    let mut sources_text = String::new();
    for passage in passages {
        let title = passage.title.as_deref().unwrap_or("Unknown");
        let snippet: String = passage.snippet.replace('\n', " ").chars().take(200).collect();
        sources_text.push_str(&format!("- {title}: {snippet}\n"));
    }
    if sources_text.is_empty() {
        sources_text.push_str("None");
    }

    let mut context_bits = String::new();
    if log_context.has_indicators() {
        context_bits.push_str(&log_context.indicators);
    }
    if let Some(digest) = &log_context.digest {
        if !context_bits.is_empty() {
            context_bits.push('\n');
        }
        context_bits.push_str("Raw events (bounded): ");
        context_bits.push_str(digest);
    }
    if context_bits.is_empty() {
        context_bits.push_str("None");
    }

    format!(
        "Alert:\n{alert}\n\n\
         Context:\n{context_bits}\n\n\
         Relevant reference documents:\n{sources_text}\n\n\
         Return ONLY a JSON object with keys:\n\
         - \"incident_type\": short string describing the likely incident (e.g., \"Brute Force (T1110)\")\n\
         - \"steps\": an array of 3-7 concise, actionable steps\n\
         - \"references\": an array of short source titles (e.g., \"NIST SP 800-61\", \"MITRE ATT&CK T1110\")\n"
    )
}

/// Opportunistic parse of the structured breakdown. Absence is not an error.
fn parse_structured(content: &str) -> Option<StructuredRemediation> {
    serde_json::from_str(content.trim()).ok()
}

/// Convert the structured breakdown into a markdown block for the UI.
fn structured_to_markdown(remediation: &StructuredRemediation, passages: &[RetrievedPassage]) -> String {
    let mut md = Vec::new();
    md.push(format!("**Incident Type:** {}\n", remediation.incident_type));

    if !remediation.steps.is_empty() {
        md.push("**Recommended Steps:**".to_string());
        for (i, step) in remediation.steps.iter().enumerate() {
            md.push(format!("{}. {}", i + 1, step));
        }
        md.push(String::new());
    }

    // Fall back to passage provenance when the model cites nothing itself.
    let references: Vec<String> = if remediation.references.is_empty() {
        passages.iter().filter_map(|p| p.title.clone()).collect()
    } else {
        remediation.references.clone()
    };

    if !references.is_empty() {
        md.push("**References:**".to_string());
        for reference in references {
            md.push(format!("- {reference}"));
        }
    }

    md.join("\n")
}
