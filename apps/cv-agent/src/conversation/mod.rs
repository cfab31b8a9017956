//! Conversation transcript sent to the model on every turn.
//!
//! The first `protected_len` entries (system instructions, suggested paths and
//! the attachment turn) are pinned: trimming only ever removes entries after
//! them, oldest first, so turn order is preserved for the transport.

pub mod budget;

use serde::Serialize;
use serde_json::Value;

pub use budget::{TokenBudget, TrimReport};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText {
        text: String,
    },
    InputFile {
        file_id: String,
    },
    InputImage {
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        detail: &'static str,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One transcript entry in the transport's input format.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        role: Role,
        content: MessageContent,
    },
    /// The result paired with a model tool call, by call id.
    FunctionCallOutput { call_id: String, output: String },
}

impl InputItem {
    pub fn system(text: impl Into<String>) -> Self {
        Self::Message {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::Message {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::Message {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    /// Tool results are sent as strings; non-string payloads are JSON-encoded.
    pub fn tool_output(call_id: impl Into<String>, output: &Value) -> Self {
        let output = match output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self::FunctionCallOutput {
            call_id: call_id.into(),
            output,
        }
    }

    #[cfg(test)]
    pub fn is_tool_output_for(&self, id: &str) -> bool {
        matches!(self, Self::FunctionCallOutput { call_id, .. } if call_id == id)
    }
}

/// Ordered transcript with a pinned prefix.
#[derive(Debug, Clone)]
pub struct Conversation {
    items: Vec<InputItem>,
    protected_len: usize,
}

impl Conversation {
    /// Every entry of `prefix` is protected from trimming.
    pub fn new(prefix: Vec<InputItem>) -> Self {
        let protected_len = prefix.len();
        Self {
            items: prefix,
            protected_len,
        }
    }

    pub fn push(&mut self, item: InputItem) {
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = InputItem>) {
        self.items.extend(items);
    }

    pub fn items(&self) -> &[InputItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn protected_len(&self) -> usize {
        self.protected_len
    }

    pub fn estimated_tokens(&self) -> usize {
        budget::estimate_tokens(&self.items)
    }

    pub fn trim_to_budget(&mut self, token_budget: &TokenBudget) -> TrimReport {
        budget::trim_to_budget(&mut self.items, self.protected_len, token_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_serializes_in_responses_format() {
        let item = InputItem::user_parts(vec![
            ContentPart::InputText {
                text: "see attached".to_string(),
            },
            ContentPart::InputFile {
                file_id: "file_1".to_string(),
            },
        ]);
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({
                "type": "message",
                "role": "user",
                "content": [
                    {"type": "input_text", "text": "see attached"},
                    {"type": "input_file", "file_id": "file_1"}
                ]
            })
        );
    }

    #[test]
    fn test_tool_output_encodes_non_string_payloads() {
        let item = InputItem::tool_output("call_1", &json!({"ok": true}));
        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({"type": "function_call_output", "call_id": "call_1", "output": "{\"ok\":true}"})
        );

        let item = InputItem::tool_output("call_2", &json!("plain"));
        assert!(matches!(item, InputItem::FunctionCallOutput { ref output, .. } if output == "plain"));
        assert!(item.is_tool_output_for("call_2"));
    }

    #[test]
    fn test_conversation_protects_its_prefix() {
        let mut conversation = Conversation::new(vec![
            InputItem::system("rules"),
            InputItem::user("cv attached"),
        ]);
        conversation.push(InputItem::system("x".repeat(4_000)));
        assert_eq!(conversation.protected_len(), 2);

        let report = conversation.trim_to_budget(&TokenBudget::new(100, 1.0));
        assert_eq!(report.removed, 1);
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.items()[0], InputItem::system("rules"));
    }
}
