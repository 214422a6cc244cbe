//! Convenience re-exports for common `cinch-prune` types.
//!
//! ```ignore
//! use cinch_prune::prelude::*;
//! ```
//!
//! Pulls in the message types, the scorer, the pruning engine and its
//! policy, and the session log helpers. Lower-level pieces (pair maps, score
//! explanations, token deltas) live in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ContentPart, Message, MessageContent, MessageRole, ToolCall};

// ── Scoring and pruning ─────────────────────────────────────────────
pub use crate::context::{PrunePolicy, PruneResult, ScoreStats, prune, score};

// ── Session log ─────────────────────────────────────────────────────
pub use crate::session::{
    InMemoryStore, JsonlSessionLog, MessageStore, prune_snapshot, prune_store,
    read_session_log, write_session_log,
};
