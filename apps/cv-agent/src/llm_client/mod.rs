/// LLM Client: the single point of entry for all model calls in cv-agent.
///
/// The controller and the insight generator only see the `LlmTransport`
/// trait; `OpenAiClient` is the production implementation over the OpenAI
/// Responses and Files APIs. Tests inject scripted transports instead.
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::conversation::InputItem;

pub mod parser;
pub mod prompts;

pub use parser::ToolCallRequest;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Could not read upload {path}: {message}")]
    Upload { path: String, message: String },

    #[error("Response is missing field '{0}'")]
    MissingField(&'static str),
}

// ────────────────────────────────────────────────────────────────────────────
// Request / response types
// ────────────────────────────────────────────────────────────────────────────

/// A function the model may call, with a JSON-schema parameter definition.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub strict: bool,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function",
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            strict: false,
        }
    }
}

/// `tool_choice` policy for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    /// Force one named function.
    Function(String),
}

impl Serialize for ToolChoice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ToolChoice::Auto => serializer.serialize_str("auto"),
            ToolChoice::Function(name) => {
                json!({ "type": "function", "name": name }).serialize(serializer)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Reasoning {
    pub effort: &'static str,
    pub summary: &'static str,
}

/// One call to the "create a response" endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRequest {
    pub model: String,
    pub input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Reasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

/// A model response. The raw body is kept because tool calls can arrive in
/// several historical shapes; `parser` normalizes them.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub id: String,
    pub raw: Value,
}

impl ModelResponse {
    pub fn from_raw(raw: Value) -> Result<Self, LlmError> {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or(LlmError::MissingField("id"))?
            .to_string();
        Ok(Self { id, raw })
    }

    pub fn tool_calls(&self) -> Vec<ToolCallRequest> {
        parser::extract_tool_calls(&self.raw)
    }

    pub fn text(&self) -> String {
        parser::extract_text(&self.raw)
    }
}

/// Purpose tag attached to uploaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePurpose {
    UserData,
    Vision,
}

impl FilePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilePurpose::UserData => "user_data",
            FilePurpose::Vision => "vision",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport trait
// ────────────────────────────────────────────────────────────────────────────

/// The opaque RPC surface the agent drives. Constructed once per process and
/// injected into the controller.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn create_response(&self, request: &ResponseRequest) -> Result<ModelResponse, LlmError>;

    /// Uploads a local file and returns its remote id.
    async fn upload_file(&self, path: &Path, purpose: FilePurpose) -> Result<String, LlmError>;

    async fn delete_file(&self, file_id: &str) -> Result<(), LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// OpenAI implementation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

/// Wraps the OpenAI Responses and Files APIs with retry logic.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(600))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn error_from(response: reqwest::Response) -> LlmError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<OpenAiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        LlmError::Api { status, message }
    }
}

#[async_trait]
impl LlmTransport for OpenAiClient {
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    async fn create_response(&self, request: &ResponseRequest) -> Result<ModelResponse, LlmError> {
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(self.url("responses"))
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let err = Self::error_from(response).await;
                warn!("LLM API returned {}: {}", status, err);
                last_error = Some(err);
                continue;
            }

            if !status.is_success() {
                return Err(Self::error_from(response).await);
            }

            let raw: Value = response.json().await?;
            let parsed = ModelResponse::from_raw(raw)?;

            if let Some((input_tokens, output_tokens)) = token_usage(&parsed.raw) {
                debug!(
                    response_id = %parsed.id,
                    input_tokens,
                    output_tokens,
                    "LLM call succeeded"
                );
            }

            return Ok(parsed);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }

    async fn upload_file(&self, path: &Path, purpose: FilePurpose) -> Result<String, LlmError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| LlmError::Upload {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let form = Form::new()
            .text("purpose", purpose.as_str())
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(self.url("files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let uploaded: UploadedFile = response.json().await?;
        Ok(uploaded.id)
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), LlmError> {
        let response = self
            .client
            .delete(self.url(&format!("files/{file_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }
}

/// `(input_tokens, output_tokens)` from a response's `usage` block.
fn token_usage(raw: &Value) -> Option<(u64, u64)> {
    let usage = raw.get("usage")?;
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    Some((count("input_tokens"), count("output_tokens")))
}
