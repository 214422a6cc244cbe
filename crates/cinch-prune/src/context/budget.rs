//! Rough token accounting for pruning reports.
//!
//! Pruning decisions are made on message counts; token estimates exist so a
//! report can say how much context a prune actually recovered.

use crate::Message;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Character count a message contributes to the context: its text plus the
/// names and raw arguments of any tool calls it makes.
pub fn message_chars(msg: &Message) -> usize {
    let text = msg.text().len();
    let calls: usize = msg.tool_calls.as_ref().map_or(0, |calls| {
        calls
            .iter()
            .map(|c| c.function.name.len() + c.function.arguments.len())
            .sum()
    });
    text + calls
}

/// Estimate total tokens for a slice of messages.
pub fn estimate_tokens(messages: &[Message], chars_per_token: f64) -> usize {
    let total_chars: usize = messages.iter().map(message_chars).sum();
    if chars_per_token <= 0.0 {
        return total_chars;
    }
    (total_chars as f64 / chars_per_token) as usize
}

/// Token estimate before and after a prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDelta {
    pub before: usize,
    pub after: usize,
}

impl TokenDelta {
    /// Estimate the delta between an original and a kept sequence.
    pub fn between(original: &[Message], kept: &[Message], chars_per_token: f64) -> Self {
        Self {
            before: estimate_tokens(original, chars_per_token),
            after: estimate_tokens(kept, chars_per_token),
        }
    }

    /// Tokens recovered by the prune.
    pub fn freed(&self) -> usize {
        self.before.saturating_sub(self.after)
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "~{} -> ~{} tokens ({} freed)",
            self.before,
            self.after,
            self.freed()
        )
    }
}
