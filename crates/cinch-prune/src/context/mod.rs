//! Context window management: importance scoring and pruning.
//!
//! The conversation log is the scarcest resource in any LLM agent. This
//! module keeps it bounded without an LLM call:
//!
//! 1. **[`importance`]**: scores each message 0 to 1 from its content (code,
//!    decisions, errors, references, length, role) and flags tool outputs that
//!    repeat their predecessor.
//!
//! 2. **[`pruning`]**: drops the lowest-scoring messages once the log passes
//!    its trigger size, keeping the pinned head, the recency window, the
//!    active message, and every tool call/result pair intact.
//!
//! 3. **[`policy`]**: [`PrunePolicy`] thresholds and protected-zone sizes.
//!
//! 4. **[`budget`]**: token estimates for reporting what a prune recovered.

pub mod budget;
pub mod importance;
pub mod policy;
pub mod pruning;

// Re-export commonly used items at the module level.
pub use budget::{DEFAULT_CHARS_PER_TOKEN, TokenDelta, estimate_tokens};
pub use importance::{ScoreExplanation, ScoreRule, explain, find_repetitive, score};
pub use policy::PrunePolicy;
pub use pruning::{PairMap, PruneResult, ScoreStats, prune, score_all};
