use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::agent::policy::Profile;
use crate::conversation::budget::DEFAULT_RESERVE_RATIO;

pub const DEFAULT_MODEL: &str = "gpt-5-codex";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 128_000;
/// gpt-5-codex exposes roughly 200k tokens of context.
const DEFAULT_CONTEXT_TOKENS: usize = 200_000;
const DEFAULT_MAX_TURNS: usize = 8;

/// How the source résumé reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentMode {
    /// Upload the PDF and reference it by remote file id.
    Upload,
    /// Extract the text locally and embed it in the first user turn.
    Inline,
}

impl FromStr for AttachmentMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "upload" => Ok(Self::Upload),
            "inline" => Ok(Self::Inline),
            other => bail!("unknown attachment mode '{other}' (expected 'upload' or 'inline')"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model: String,
    pub debug: bool,
    pub max_output_tokens: u32,
    pub context_tokens: usize,
    pub reserve_ratio: f64,
    pub insight_model: Option<String>,
    pub insights_enabled: bool,
    pub max_turns: usize,
    pub profile: Profile,
    pub attachment: AttachmentMode,
    pub upload_previews: bool,
    pub chrome_bin: String,
    pub rust_log: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let reserve_ratio: f64 = parse_env("CONTEXT_RESERVE_RATIO", DEFAULT_RESERVE_RATIO)?;
        if !(reserve_ratio > 0.0 && reserve_ratio <= 1.0) {
            bail!("CONTEXT_RESERVE_RATIO must be within (0, 1], got {reserve_ratio}");
        }

        let max_turns: usize = parse_env("CV_AGENT_MAX_TURNS", DEFAULT_MAX_TURNS)?;
        if max_turns == 0 {
            bail!("CV_AGENT_MAX_TURNS must be at least 1");
        }

        Ok(Config {
            openai_api_key: require_env("OPENAI_API_KEY")?,
            openai_base_url: optional_env("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: optional_env("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            debug: flag_env("CV_AGENT_DEBUG", false),
            max_output_tokens: parse_env("MAX_OUTPUT_TOKENS", DEFAULT_MAX_OUTPUT_TOKENS)?,
            context_tokens: parse_env("MODEL_CONTEXT_TOKENS", DEFAULT_CONTEXT_TOKENS)?,
            reserve_ratio,
            insight_model: optional_env("INSIGHT_MODEL"),
            insights_enabled: flag_env("CV_AGENT_INSIGHTS", true),
            max_turns,
            profile: parse_env("CV_AGENT_PROFILE", Profile::Review)?,
            attachment: parse_env("CV_AGENT_ATTACHMENT", AttachmentMode::Upload)?,
            upload_previews: flag_env("CV_AGENT_PREVIEW_UPLOAD", false),
            chrome_bin: optional_env("CV_AGENT_CHROME").unwrap_or_else(|| "chromium".to_string()),
            rust_log: optional_env("RUST_LOG"),
        })
    }

    /// Log filter directive: `RUST_LOG` wins, then the debug toggle.
    pub fn log_filter(&self) -> String {
        match &self.rust_log {
            Some(filter) => filter.clone(),
            None if self.debug => "cv_agent=debug".to_string(),
            None => "cv_agent=info".to_string(),
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn flag_env(key: &str, default: bool) -> bool {
    match optional_env(key) {
        Some(value) => matches!(value.as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}")),
        None => Ok(default),
    }
}
