//! Importance-based pruning: drop the least valuable messages until the
//! conversation is back under its target size.
//!
//! One call to [`prune`] works on a snapshot of the message list and returns
//! a new list; the input is never mutated. The procedure:
//!
//! 1. Compute the effective target from the policy and aggressiveness. If the
//!    list already fits, return it unchanged.
//! 2. Link every tool result to the nearest earlier message that issued its
//!    call id ([`PairMap`]).
//! 3. Score every message; cap tool outputs that repeat their predecessor at
//!    [`REPETITIVE_SCORE_CEILING`].
//! 4. Protect the first `keep_first` and last `keep_recent` positions, and
//!    always the final message.
//! 5. Rank the rest ascending by score (below-floor tier first, ties by
//!    position) and remove greedily until the quota is met. A paired message
//!    is removed together with its whole pair cluster, or not at all when any
//!    member of the cluster is protected.
//!
//! Removing a cluster can overshoot the quota. That is accepted: a kept set
//! slightly smaller than the target is better than a tool call without its
//! result.

use crate::context::importance::{find_repetitive, score};
use crate::context::policy::{DEFAULT_MIN_IMPORTANCE, PrunePolicy};
use crate::{Message, MessageRole};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Score ceiling for tool outputs that repeat the output right before them.
pub const REPETITIVE_SCORE_CEILING: f64 = 0.2;

/// Summary of the scores of removed messages. All zero when nothing was removed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl ScoreStats {
    fn from_scores(scores: &[f64]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        Self { min, max, avg }
    }
}

/// Outcome of a [`prune`] call.
#[derive(Debug, Clone)]
pub struct PruneResult {
    /// Surviving messages, in their original order.
    pub kept: Vec<Message>,
    /// Number of messages removed.
    pub removed_count: usize,
    /// Number of messages in the input.
    pub original_count: usize,
    /// Positions (in the input) of the removed messages, ascending.
    pub removed_indices: Vec<usize>,
    /// Score summary of the removed messages.
    pub removed_score_stats: ScoreStats,
}

impl PruneResult {
    pub(crate) fn unchanged(messages: &[Message]) -> Self {
        Self {
            kept: messages.to_vec(),
            removed_count: 0,
            original_count: messages.len(),
            removed_indices: Vec::new(),
            removed_score_stats: ScoreStats::default(),
        }
    }

    /// Whether the call removed nothing.
    pub fn is_noop(&self) -> bool {
        self.removed_count == 0
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        if self.is_noop() {
            return format!("pruned 0 of {} messages", self.original_count);
        }
        let s = &self.removed_score_stats;
        format!(
            "pruned {} of {} messages (kept {}); removed scores {:.2}-{:.2}, avg {:.2}",
            self.removed_count,
            self.original_count,
            self.kept.len(),
            s.min,
            s.max,
            s.avg,
        )
    }
}

// ── Pairing ────────────────────────────────────────────────────────

/// Symmetric links between tool-call messages and their results.
///
/// One call message may link to several results (parallel tool calls), so
/// this is an adjacency map rather than a one-to-one map.
#[derive(Debug, Clone, Default)]
pub struct PairMap {
    links: BTreeMap<usize, BTreeSet<usize>>,
}

impl PairMap {
    /// Link each tool result to the nearest earlier message whose tool calls
    /// include its `tool_call_id`. Results with no such message stay unpaired.
    pub fn build(messages: &[Message]) -> Self {
        let mut map = Self::default();
        let mut last_call: HashMap<&str, usize> = HashMap::new();

        for (i, msg) in messages.iter().enumerate() {
            if msg.role == MessageRole::Tool
                && let Some(ref id) = msg.tool_call_id
                && let Some(&caller) = last_call.get(id.as_str())
            {
                map.link(caller, i);
            }
            if let Some(ref calls) = msg.tool_calls {
                for call in calls {
                    last_call.insert(call.id.as_str(), i);
                }
            }
        }

        map
    }

    fn link(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.links.entry(a).or_default().insert(b);
        self.links.entry(b).or_default().insert(a);
    }

    /// Whether position `i` has any partner.
    pub fn is_paired(&self, i: usize) -> bool {
        self.links.get(&i).is_some_and(|p| !p.is_empty())
    }

    /// Direct partners of position `i`.
    pub fn partners(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.links.get(&i).into_iter().flatten().copied()
    }

    /// Every position reachable from `i` through pair links, including `i`.
    pub fn cluster(&self, i: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::from([i]);
        let mut stack = vec![i];
        while let Some(pos) = stack.pop() {
            for next in self.partners(pos) {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen
    }

    /// Number of linked positions.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

// ── Scoring and protection ─────────────────────────────────────────

/// Score every message, applying the repetition ceiling to tool outputs
/// that repeat their predecessor.
pub fn score_all(messages: &[Message]) -> Vec<f64> {
    let repetitive = find_repetitive(messages);
    messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let s = score(msg);
            if repetitive.contains(&i) {
                s.min(REPETITIVE_SCORE_CEILING)
            } else {
                s
            }
        })
        .collect()
}

/// The message count pruning aims for.
///
/// `aggressiveness > 1` prunes harder, `< 1` gentler. The result never drops
/// below the protected zones plus one.
pub fn effective_target(policy: &PrunePolicy, aggressiveness: f64) -> usize {
    let aggressiveness = sanitize_aggressiveness(aggressiveness);
    let scaled = (policy.target_messages as f64 / aggressiveness).round() as usize;
    policy
        .keep_first
        .saturating_add(policy.keep_recent)
        .saturating_add(1)
        .max(scaled)
}

fn sanitize_aggressiveness(aggressiveness: f64) -> f64 {
    if aggressiveness.is_finite() && aggressiveness > 0.0 {
        aggressiveness
    } else {
        warn!("invalid aggressiveness {aggressiveness}, using 1.0");
        1.0
    }
}

/// Whether position `i` of a `len`-message list may never be pruned.
pub fn is_protected(i: usize, len: usize, policy: &PrunePolicy) -> bool {
    i < policy.keep_first || i.saturating_add(policy.keep_recent) >= len || i + 1 == len
}

/// The policy's importance floor, pulled into `[0, 1]`. A non-finite floor
/// falls back to [`DEFAULT_MIN_IMPORTANCE`], as [`PrunePolicy::clamped`] does.
fn importance_floor(policy: &PrunePolicy) -> f64 {
    if policy.min_importance.is_finite() {
        policy.min_importance.clamp(0.0, 1.0)
    } else {
        DEFAULT_MIN_IMPORTANCE
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Prune `messages` down to the policy's target size.
///
/// Never fails: degenerate input yields either the unchanged list or a
/// consistent kept/removed partition.
pub fn prune(messages: &[Message], policy: &PrunePolicy, aggressiveness: f64) -> PruneResult {
    let len = messages.len();
    if len == 0 {
        return PruneResult::unchanged(messages);
    }

    let target = effective_target(policy, aggressiveness);
    if len <= target {
        debug!("prune: {len} messages within target {target}, nothing to do");
        return PruneResult::unchanged(messages);
    }
    let quota = len - target;

    let pairs = PairMap::build(messages);
    let scores = score_all(messages);
    let protected: Vec<bool> = (0..len).map(|i| is_protected(i, len, policy)).collect();
    let floor = importance_floor(policy);

    let mut ranked: Vec<usize> = (0..len).filter(|&i| !protected[i]).collect();
    ranked.sort_by(|&a, &b| rank_order(a, b, &scores, floor));

    debug!(
        "prune: {len} messages, target {target}, quota {quota}, {} candidates, {} paired",
        ranked.len(),
        pairs.len(),
    );

    let mut removed = vec![false; len];
    let mut removed_count = 0;

    for &i in &ranked {
        if removed_count >= quota {
            break;
        }
        if removed[i] {
            continue;
        }
        if !pairs.is_paired(i) {
            removed[i] = true;
            removed_count += 1;
            continue;
        }

        let cluster = pairs.cluster(i);
        if let Some(&guard) = cluster.iter().find(|&&j| protected[j]) {
            debug!("prune: skipping {i}, paired with protected message {guard}");
            continue;
        }
        for j in cluster {
            if !removed[j] {
                removed[j] = true;
                removed_count += 1;
            }
        }
    }

    if removed_count > quota {
        debug!("prune: pair clusters overshot quota {quota} by {}", removed_count - quota);
    }

    let mut kept = Vec::with_capacity(len - removed_count);
    let mut removed_indices = Vec::with_capacity(removed_count);
    let mut removed_scores = Vec::with_capacity(removed_count);
    for (i, msg) in messages.iter().enumerate() {
        if removed[i] {
            removed_indices.push(i);
            removed_scores.push(scores[i]);
        } else {
            kept.push(msg.clone());
        }
    }

    let result = PruneResult {
        kept,
        removed_count,
        original_count: len,
        removed_indices,
        removed_score_stats: ScoreStats::from_scores(&removed_scores),
    };
    info!("{}", result.to_log_string());
    result
}

/// Below-floor positions first, then ascending score, then position.
fn rank_order(a: usize, b: usize, scores: &[f64], floor: f64) -> Ordering {
    let above_a = scores[a] >= floor;
    let above_b = scores[b] >= floor;
    above_a
        .cmp(&above_b)
        .then(scores[a].total_cmp(&scores[b]))
        .then(a.cmp(&b))
}
