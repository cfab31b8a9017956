//! Token Budget Trimmer: keeps the transcript under a fraction of the
//! model's context window.
//!
//! Estimation is deliberately crude: text costs one token per 4 characters
//! (whitespace collapsed), inline images cost one token per 4 bytes of their
//! base64 payload, remote file references cost nothing.

use super::{ContentPart, InputItem, MessageContent};

pub const DEFAULT_RESERVE_RATIO: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBudget {
    pub max_tokens: usize,
    pub reserve_ratio: f64,
}

impl TokenBudget {
    pub fn new(max_tokens: usize, reserve_ratio: f64) -> Self {
        Self {
            max_tokens,
            reserve_ratio,
        }
    }

    pub fn threshold(&self) -> usize {
        (self.max_tokens as f64 * self.reserve_ratio).floor() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrimReport {
    pub removed: usize,
    pub tokens: usize,
}

pub fn estimate_text_tokens(text: &str) -> usize {
    let chars: usize = text
        .split_whitespace()
        .map(|word| word.chars().count())
        .sum::<usize>();
    if chars == 0 {
        return 0;
    }
    let words = text.split_whitespace().count();
    // collapsed length = word chars + single spaces between words
    (chars + words - 1).div_ceil(4)
}

fn estimate_part_tokens(part: &ContentPart) -> usize {
    match part {
        ContentPart::InputText { text } => estimate_text_tokens(text),
        ContentPart::InputFile { .. } => 0,
        ContentPart::InputImage { image_url, .. } => match image_url {
            Some(url) => {
                let payload = url
                    .split_once("base64,")
                    .map(|(_, data)| data)
                    .unwrap_or(url);
                payload.len().div_ceil(4)
            }
            None => 0,
        },
    }
}

pub fn estimate_item_tokens(item: &InputItem) -> usize {
    match item {
        InputItem::Message { content, .. } => match content {
            MessageContent::Text(text) => estimate_text_tokens(text),
            MessageContent::Parts(parts) => parts.iter().map(estimate_part_tokens).sum(),
        },
        InputItem::FunctionCallOutput { output, .. } => estimate_text_tokens(output),
    }
}

pub fn estimate_tokens(items: &[InputItem]) -> usize {
    items.iter().map(estimate_item_tokens).sum()
}

/// Removes the oldest unprotected entry until the estimate is at or under
/// the threshold, or only the protected prefix is left.
pub fn trim_to_budget(
    items: &mut Vec<InputItem>,
    protected_len: usize,
    budget: &TokenBudget,
) -> TrimReport {
    let mut total = estimate_tokens(items);
    if budget.max_tokens == 0 {
        return TrimReport {
            removed: 0,
            tokens: total,
        };
    }

    let threshold = budget.threshold();
    let mut removed = 0;
    while total > threshold && items.len() > protected_len {
        let dropped = items.remove(protected_len);
        total -= estimate_item_tokens(&dropped);
        removed += 1;
    }

    TrimReport {
        removed,
        tokens: total,
    }
}
