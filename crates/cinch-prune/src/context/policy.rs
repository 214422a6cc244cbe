//! Pruning thresholds and protected-zone sizes.
//!
//! [`PrunePolicy`] is owned by whoever drives pruning (the CLI, a harness
//! hook). It is validated once with [`PrunePolicy::clamped()`] before it
//! reaches the engine; the engine itself only clamps defensively.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Default message count above which pruning triggers.
pub const DEFAULT_MAX_MESSAGES: usize = 200;

/// Default message count pruning aims for.
pub const DEFAULT_TARGET_MESSAGES: usize = 120;

/// Default importance floor. Messages scoring below it are evicted first.
pub const DEFAULT_MIN_IMPORTANCE: f64 = 0.3;

/// Default number of leading messages that are never pruned.
pub const DEFAULT_KEEP_FIRST: usize = 4;

/// Default number of trailing messages that are never pruned.
pub const DEFAULT_KEEP_RECENT: usize = 20;

/// Thresholds for importance-based pruning.
///
/// Missing fields in a policy file fall back to the defaults above.
///
/// # Example
///
/// ```
/// use cinch_prune::context::policy::PrunePolicy;
///
/// let policy = PrunePolicy::default()
///     .with_max_messages(80)
///     .with_target_messages(50)
///     .with_keep_recent(10)
///     .clamped();
///
/// assert!(policy.should_prune(81));
/// assert!(!policy.should_prune(80));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PrunePolicy {
    /// Whether automatic (trigger-based) pruning is active.
    pub enabled: bool,
    /// Prune when the log holds more than this many messages.
    pub max_messages: usize,
    /// Message count to prune down to.
    pub target_messages: usize,
    /// Importance floor separating the two eviction tiers.
    pub min_importance: f64,
    /// Leading messages (system prompt, original task) that are always kept.
    pub keep_first: usize,
    /// Trailing messages (recency window) that are always kept.
    pub keep_recent: usize,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: DEFAULT_MAX_MESSAGES,
            target_messages: DEFAULT_TARGET_MESSAGES,
            min_importance: DEFAULT_MIN_IMPORTANCE,
            keep_first: DEFAULT_KEEP_FIRST,
            keep_recent: DEFAULT_KEEP_RECENT,
        }
    }
}

impl PrunePolicy {
    /// Create a policy with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the trigger size.
    pub fn with_max_messages(mut self, n: usize) -> Self {
        self.max_messages = n;
        self
    }

    /// Set the target size.
    pub fn with_target_messages(mut self, n: usize) -> Self {
        self.target_messages = n;
        self
    }

    /// Set the importance floor.
    pub fn with_min_importance(mut self, floor: f64) -> Self {
        self.min_importance = floor;
        self
    }

    /// Set the number of protected leading messages.
    pub fn with_keep_first(mut self, n: usize) -> Self {
        self.keep_first = n;
        self
    }

    /// Set the number of protected trailing messages.
    pub fn with_keep_recent(mut self, n: usize) -> Self {
        self.keep_recent = n;
        self
    }

    /// Return a copy with every field pulled into a mutually consistent range.
    ///
    /// - `min_importance` in `[0, 1]` (non-finite values reset to the default)
    /// - `target_messages >= 1`
    /// - `max_messages > target_messages`
    /// - `keep_first + keep_recent < target_messages`, shrinking `keep_recent`
    ///   before `keep_first`
    pub fn clamped(&self) -> Self {
        let mut p = self.clone();

        if !p.min_importance.is_finite() {
            warn!(
                "min_importance {} is not finite, using {}",
                p.min_importance, DEFAULT_MIN_IMPORTANCE
            );
            p.min_importance = DEFAULT_MIN_IMPORTANCE;
        }
        p.min_importance = p.min_importance.clamp(0.0, 1.0);

        p.target_messages = p.target_messages.clamp(1, usize::MAX - 1);
        if p.max_messages <= p.target_messages {
            warn!(
                "max_messages {} must exceed target_messages {}, raising it",
                p.max_messages, p.target_messages
            );
            p.max_messages = p.target_messages + 1;
        }

        let room = p.target_messages - 1;
        if p.keep_first.saturating_add(p.keep_recent) > room {
            warn!(
                "keep_first {} + keep_recent {} leaves no room under target {}, shrinking",
                p.keep_first, p.keep_recent, p.target_messages
            );
            p.keep_recent = room.saturating_sub(p.keep_first);
            p.keep_first = p.keep_first.min(room - p.keep_recent);
        }

        p
    }

    /// Whether a log of `len` messages should be pruned automatically.
    pub fn should_prune(&self, len: usize) -> bool {
        self.enabled && len > self.max_messages
    }

    /// Load a policy from a JSON file and clamp it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read policy file '{}': {e}", path.display()))?;
        let policy: Self = serde_json::from_str(&raw)
            .map_err(|e| format!("failed to parse policy file '{}': {e}", path.display()))?;
        Ok(policy.clamped())
    }
}
