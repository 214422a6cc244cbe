//! Importance-scored pruning for agent conversation history.
//!
//! An agent's message log only ever grows: user turns, assistant replies, tool
//! calls and the tool results they produce. `cinch-prune` keeps that log
//! bounded. Every message gets a 0 to 1 importance score from a fixed set of
//! text heuristics, and when the log grows past a trigger size the lowest
//! value messages are dropped until the log is back under a target size.
//!
//! Pruning never splits a tool call from its results, never touches the
//! pinned head of the conversation or the recency window, and never removes
//! the final (active) message.
//!
//! # Getting started
//!
//! ```
//! use cinch_prune::prelude::*;
//!
//! let mut messages = vec![Message::system("You are a coding agent.")];
//! for i in 0..30 {
//!     messages.push(Message::user(format!("step {i}: keep going with the refactor")));
//! }
//!
//! let policy = PrunePolicy::default()
//!     .with_target_messages(20)
//!     .with_keep_first(2)
//!     .with_keep_recent(5);
//!
//! let result = prune(&messages, &policy, 1.0);
//! assert_eq!(result.kept.len(), 20);
//! assert_eq!(result.kept.len() + result.removed_count, result.original_count);
//! ```
//!
//! # Where to find things
//!
//! - **Scoring a single message:** [`score`](context::importance::score) and
//!   [`explain`](context::importance::explain) in [`context::importance`].
//! - **Pruning a sequence:** [`prune`](context::pruning::prune) and
//!   [`PruneResult`](context::pruning::PruneResult) in [`context::pruning`].
//! - **Thresholds:** [`PrunePolicy`](context::policy::PrunePolicy).
//! - **Reading and rewriting a JSONL session log:** [`session`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | Importance scoring, repetition detection, pruning engine, policy, token estimates |
//! | [`session`] | JSONL session log I/O and the [`MessageStore`](session::MessageStore) seam |

pub mod context;
pub mod prelude;
pub mod session;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Message payload: plain text, or an ordered list of typed parts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One part of a multi-part message payload.
///
/// Only the plain shapes of text and image parts are decoded. Anything else,
/// including a known kind carrying fields this crate does not model, is kept
/// verbatim as [`ContentPart::Other`] and written back unchanged.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(from = "Value", into = "Value")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    Other(Value),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentPart {
    /// Text carried by this part, if it is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::Other(v) if v.get("type").and_then(Value::as_str) == Some("text") => {
                v.get("text").and_then(Value::as_str)
            }
            _ => None,
        }
    }
}

/// Whether `obj` holds exactly the keys in `keys`.
fn has_exactly(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    obj.len() == keys.len() && keys.iter().all(|k| obj.contains_key(*k))
}

impl From<Value> for ContentPart {
    fn from(value: Value) -> Self {
        decode_plain_part(&value).unwrap_or(ContentPart::Other(value))
    }
}

/// Decode the exact plain shapes of text and image parts.
fn decode_plain_part(value: &Value) -> Option<ContentPart> {
    let obj = value.as_object()?;
    match obj.get("type")?.as_str()? {
        "text" if has_exactly(obj, &["type", "text"]) => Some(ContentPart::Text {
            text: obj.get("text")?.as_str()?.to_string(),
        }),
        "image_url" if has_exactly(obj, &["type", "image_url"]) => {
            let img = obj.get("image_url")?.as_object()?;
            if !has_exactly(img, &["url"]) {
                return None;
            }
            Some(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: img.get("url")?.as_str()?.to_string(),
                },
            })
        }
        _ => None,
    }
}

impl From<ContentPart> for Value {
    fn from(part: ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
            ContentPart::ImageUrl { image_url } => {
                json!({ "type": "image_url", "image_url": { "url": image_url.url } })
            }
            ContentPart::Other(value) => value,
        }
    }
}

/// A message in the conversation.
///
/// Fields this crate does not model (`name`, provider extensions) are kept in
/// `extra` so rewriting a log never drops them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Message {
    fn text_message(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
            extra: Map::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text_message(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text_message(MessageRole::User, content)
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::text_message(MessageRole::Assistant, content)
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
            extra: Map::new(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
            extra: Map::new(),
        }
    }

    /// Build a message from an ordered list of content parts.
    pub fn with_parts(role: MessageRole, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Parts(parts)),
            tool_calls: None,
            tool_call_id: None,
            extra: Map::new(),
        }
    }

    /// Plain text of the payload. Text parts are joined with newlines;
    /// non-text parts are ignored.
    pub fn text(&self) -> String {
        match &self.content {
            None => String::new(),
            Some(MessageContent::Text(s)) => s.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter_map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether the message carries anything besides text: image or unknown
    /// parts, or tool-call descriptors.
    pub fn has_non_text(&self) -> bool {
        let non_text_part = matches!(
            &self.content,
            Some(MessageContent::Parts(parts))
                if parts.iter().any(|p| p.as_text().is_none())
        );
        non_text_part || self.has_tool_calls()
    }

    /// Whether the message requests at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Whether one of this message's tool-call descriptors has the given id.
    pub fn invokes(&self, call_id: &str) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| calls.iter().any(|c| c.id == call_id))
    }
}

// ── Tool call types ────────────────────────────────────────────────

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ToolCall {
    /// Create a function tool call.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
            extra: Map::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}
