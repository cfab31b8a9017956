//! Iteration insight generator: condenses the recent turn history into one or
//! two advisory sentences via a secondary model call. The controller treats
//! every failure here as non-fatal.

use std::sync::Arc;

use tracing::debug;

use crate::conversation::InputItem;
use crate::llm_client::{LlmError, LlmTransport, ResponseRequest};

use super::prompts;
use super::state::{IterationSummary, ToolCallSummary};

/// Number of trailing summaries fed to the generator.
pub const INSIGHT_WINDOW: usize = 5;
const INSIGHT_MAX_OUTPUT_TOKENS: u32 = 200;
const INSIGHT_MAX_CHARS: usize = 280;

pub struct InsightGenerator {
    transport: Arc<dyn LlmTransport>,
    model: String,
}

impl InsightGenerator {
    pub fn new(transport: Arc<dyn LlmTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    /// Returns `None` when there is no history or the model said nothing.
    pub async fn generate(
        &self,
        history: &[&IterationSummary],
    ) -> Result<Option<String>, LlmError> {
        let start = history.len().saturating_sub(INSIGHT_WINDOW);
        let records = &history[start..];
        if records.is_empty() {
            return Ok(None);
        }

        let context = records
            .iter()
            .map(|entry| format_summary_entry(entry))
            .collect::<Vec<_>>()
            .join("\n");

        let request = ResponseRequest {
            model: self.model.clone(),
            input: vec![
                InputItem::system(prompts::INSIGHT_SYSTEM),
                InputItem::user(prompts::insight_prompt(&context)),
            ],
            tools: Vec::new(),
            tool_choice: None,
            max_output_tokens: INSIGHT_MAX_OUTPUT_TOKENS,
            reasoning: None,
            previous_response_id: None,
        };

        let response = self.transport.create_response(&request).await?;
        let insight = trim_value(&dedupe_sentences(&response.text()), INSIGHT_MAX_CHARS);
        debug!(insight = %insight, "Iteration insight generated");
        Ok((!insight.is_empty()).then_some(insight))
    }
}

/// Collapses whitespace and truncates to `max` characters with an ellipsis.
pub fn trim_value(value: &str, max: usize) -> String {
    let text = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= max {
        return text;
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// Drops repeated sentences (case-insensitive), keeping first occurrences.
pub fn dedupe_sentences(text: &str) -> String {
    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        let at_boundary = matches!(ch, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if at_boundary {
            sentences.push(std::mem::take(&mut current));
        }
    }
    sentences.push(current);

    let mut seen: Vec<String> = Vec::new();
    let mut unique: Vec<&str> = Vec::new();
    for sentence in &sentences {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let key = sentence.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        unique.push(sentence);
    }
    unique.join(" ")
}

fn format_tool_call(call: &ToolCallSummary) -> String {
    let status = if call.ok { "ok" } else { "error" };
    match &call.error {
        Some(error) => format!("{} [{status}] ({})", call.name, trim_value(error, 80)),
        None => format!("{} [{status}]", call.name),
    }
}

pub fn format_summary_entry(entry: &IterationSummary) -> String {
    let tools = if entry.tool_calls.is_empty() {
        "no tools".to_string()
    } else {
        entry
            .tool_calls
            .iter()
            .map(format_tool_call)
            .collect::<Vec<_>>()
            .join(", ")
    };

    let counters = &entry.counters;
    let mut details = vec![
        format!("fills {}", counters.fills),
        format!("previews {}", counters.previews),
    ];
    if counters.corrections > 0 {
        details.push(format!("corrections {}", counters.corrections));
    }
    if counters.export_succeeded {
        details.push("export ready".to_string());
    }
    if let Some(error) = &entry.last_error {
        details.push(format!("error: {}", trim_value(error, 90)));
    }
    if let Some(note) = &entry.note {
        details.push(trim_value(note, 90));
    }

    format!("Iteration {}: {tools} | {}", entry.turn, details.join(" · "))
}
