//! Heuristic importance scoring for conversation messages.
//!
//! Every message gets a score in `[0, 1]` from its own content alone. The
//! heuristics are an ordered rule list: a few rules settle the score outright
//! (no text, tool output, tool call, bare acknowledgment), the rest start from
//! a baseline and only ever raise a running maximum. The user-intent bonus is
//! applied last.
//!
//! | Precedence | Rule | Effect |
//! |---|---|---|
//! | 1 | [`ScoreRule::NonTextOnly`] | `0.5`, stop |
//! | 2 | [`ScoreRule::Empty`] | `0.1`, stop |
//! | 3 | [`ScoreRule::ToolOutput`] | `0.45`, stop |
//! | 4 | [`ScoreRule::ToolInvocation`] | `0.5`, stop |
//! | 5 | [`ScoreRule::Acknowledgment`] | `0.1`, stop |
//! | 6 | [`ScoreRule::ShortText`] | baseline `- 0.15` |
//! | 7 | [`ScoreRule::FencedCode`] | at least `0.8` |
//! | 8 | [`ScoreRule::InlineCode`] | at least `0.65` |
//! | 9 | [`ScoreRule::Decision`] | at least `0.75` |
//! | 10 | [`ScoreRule::ErrorTrace`] | at least `0.65` |
//! | 11 | [`ScoreRule::Reference`] | at least `0.55` |
//! | 12 | [`ScoreRule::LongText`] / [`ScoreRule::VeryLongText`] | at least `0.55` / `0.65` |
//! | 13 | [`ScoreRule::SystemContext`] | at least `0.5` |
//! | 14 | [`ScoreRule::UserIntent`] | `+ 0.1` |
//!
//! Repetition between neighbouring tool outputs is not a property of a single
//! message; [`find_repetitive`] detects it and the pruning engine applies the
//! penalty.

use crate::{Message, MessageRole};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

/// Score for messages that carry only non-text payload (images, tool calls).
pub const NON_TEXT_SCORE: f64 = 0.5;
/// Score for messages with no payload at all.
pub const EMPTY_SCORE: f64 = 0.1;
/// Score for tool output. Repetition penalties are applied by the engine.
pub const TOOL_OUTPUT_SCORE: f64 = 0.45;
/// Score for messages that request tool calls.
pub const TOOL_CALL_SCORE: f64 = 0.5;
/// Score for bare acknowledgments and greetings.
pub const ACK_SCORE: f64 = 0.1;
/// Starting point for free-text messages.
pub const BASELINE_SCORE: f64 = 0.4;

const SHORT_TEXT_CHARS: usize = 20;
const SHORT_TEXT_PENALTY: f64 = 0.15;
const SHORT_TEXT_FLOOR: f64 = 0.15;
const FENCED_CODE_SCORE: f64 = 0.8;
const INLINE_CODE_MIN_SPANS: usize = 3;
const INLINE_CODE_SCORE: f64 = 0.65;
const DECISION_SCORE: f64 = 0.75;
const ERROR_SCORE: f64 = 0.65;
const REFERENCE_SCORE: f64 = 0.55;
const LONG_TEXT_CHARS: usize = 500;
const LONG_TEXT_SCORE: f64 = 0.55;
const VERY_LONG_TEXT_CHARS: usize = 2000;
const VERY_LONG_TEXT_SCORE: f64 = 0.65;
const SYSTEM_SCORE: f64 = 0.5;
const USER_BONUS: f64 = 0.1;

/// Characters compared verbatim when checking neighbouring tool outputs.
pub const REPETITION_PREFIX_CHARS: usize = 200;
/// Lines compared after numeric normalization.
pub const REPETITION_LINES: usize = 5;
/// Shared-line fraction above which two tool outputs count as repetitive.
pub const REPETITION_OVERLAP: f64 = 0.8;

// ── Patterns ───────────────────────────────────────────────────────

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

static ACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)^(?:ok|okay|k|kk|thanks|thank you|thx|ty|got it|sure|yes|yep|yeah|yup|no|nope|cool|great|nice|perfect|sounds good|lgtm|done|alright|understood|hi|hey|hello|continue|go ahead)\.?$",
    )
});

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?s)```.*?```"));

static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"`[^`\n]+`"));

static DECISION_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:always|never)\s+(?:use|do|run|call|add|put|write|make|keep|commit|push|include|check|ask|change|touch|modify)\b",
        r"(?i)\b(?:i|we)\s+(?:prefer|decided|agreed|chose|settled on)\b",
        r"(?i)\bprefer(?:s|red|ence)?\b",
        r"(?i)\bmust(?:\s+not|n't)?\b",
        r"(?i)\bdecided\s+(?:to|on|that|against)\b",
        r"(?i)\b(?:decision|requirements?|conventions?)\b",
        r"(?i)\bfrom now on\b",
        r"(?i)\b(?:don't|do not)\s+(?:ever|use|touch|modify|change|commit)\b",
    ]
    .into_iter()
    .map(compile)
    .collect()
});

static ERROR_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:errors?|exceptions?|traceback|panic(?:ked)?|fatal|failed|failure|segfault)\b",
        // Python frames.
        r#"File "[^"]+", line \d+"#,
        // JS / JVM frames.
        r"(?m)^\s*at\s+.*[\w.-]+\.[A-Za-z][A-Za-z0-9]{0,4}:\d+",
        // rustc / go locations: an `-->` marker or a path with a separator.
        r"(?m)^\s*(?:-->\s*[\w./\\-]+|[\w.-]*[/\\][\w./\\-]+)\.[A-Za-z][A-Za-z0-9]{0,4}:\d+(?::\d+)?\b",
    ]
    .into_iter()
    .map(compile)
    .collect()
});

static REFERENCE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"https?://[^\s)>\]]+",
        r#"(?:^|[\s`'"(\[=])(?:~|\.{1,2})?/[\w.-]+/[\w.-]+"#,
        r"\b[\w-]+(?:/[\w.-]+)*/[\w-]+\.[A-Za-z][A-Za-z0-9]{0,7}\b",
    ]
    .into_iter()
    .map(compile)
    .collect()
});

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\d[\d.]*"));

// ── Scoring ────────────────────────────────────────────────────────

/// A scoring rule, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreRule {
    /// No text, but images or tool-call descriptors.
    NonTextOnly,
    /// Nothing at all.
    Empty,
    /// Tool output.
    ToolOutput,
    /// Requests one or more tool calls.
    ToolInvocation,
    /// Bare acknowledgment or greeting ("ok", "thanks.", "hey").
    Acknowledgment,
    /// Under 20 characters with no code block.
    ShortText,
    FencedCode,
    /// Three or more inline code spans.
    InlineCode,
    /// States a decision, preference or standing rule.
    Decision,
    /// Mentions an error or contains a stack frame.
    ErrorTrace,
    /// Contains a URL or a file path.
    Reference,
    LongText,
    VeryLongText,
    SystemContext,
    /// Flat bonus for user-stated intent.
    UserIntent,
}

/// A score together with the rules that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreExplanation {
    pub score: f64,
    /// Rules that fired, in precedence order.
    pub rules: Vec<ScoreRule>,
}

impl ScoreExplanation {
    fn fixed(score: f64, rule: ScoreRule) -> Self {
        Self {
            score,
            rules: vec![rule],
        }
    }
}

/// Importance of a single message, in `[0, 1]`.
///
/// Pure and deterministic: it depends only on the message itself.
pub fn score(msg: &Message) -> f64 {
    explain(msg).score
}

/// Score a message and report which rules fired.
pub fn explain(msg: &Message) -> ScoreExplanation {
    let text = msg.text();
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return if msg.has_non_text() {
            ScoreExplanation::fixed(NON_TEXT_SCORE, ScoreRule::NonTextOnly)
        } else {
            ScoreExplanation::fixed(EMPTY_SCORE, ScoreRule::Empty)
        };
    }
    if msg.role == MessageRole::Tool {
        return ScoreExplanation::fixed(TOOL_OUTPUT_SCORE, ScoreRule::ToolOutput);
    }
    if msg.has_tool_calls() {
        return ScoreExplanation::fixed(TOOL_CALL_SCORE, ScoreRule::ToolInvocation);
    }
    if ACK_RE.is_match(trimmed) {
        return ScoreExplanation::fixed(ACK_SCORE, ScoreRule::Acknowledgment);
    }

    let has_fence = FENCE_RE.is_match(trimmed);
    let len = trimmed.chars().count();

    let mut score = BASELINE_SCORE;
    let mut rules = Vec::new();

    if len < SHORT_TEXT_CHARS && !has_fence {
        score = (score - SHORT_TEXT_PENALTY).max(SHORT_TEXT_FLOOR);
        rules.push(ScoreRule::ShortText);
    }

    let mut raise = |floor: f64, rule: ScoreRule| {
        score = score.max(floor);
        rules.push(rule);
    };

    if has_fence {
        raise(FENCED_CODE_SCORE, ScoreRule::FencedCode);
    }
    let outside_fences = FENCE_RE.replace_all(trimmed, "");
    if INLINE_CODE_RE.find_iter(&outside_fences).count() >= INLINE_CODE_MIN_SPANS {
        raise(INLINE_CODE_SCORE, ScoreRule::InlineCode);
    }
    if DECISION_RES.iter().any(|re| re.is_match(trimmed)) {
        raise(DECISION_SCORE, ScoreRule::Decision);
    }
    if ERROR_RES.iter().any(|re| re.is_match(trimmed)) {
        raise(ERROR_SCORE, ScoreRule::ErrorTrace);
    }
    if REFERENCE_RES.iter().any(|re| re.is_match(trimmed)) {
        raise(REFERENCE_SCORE, ScoreRule::Reference);
    }
    if len > VERY_LONG_TEXT_CHARS {
        raise(VERY_LONG_TEXT_SCORE, ScoreRule::VeryLongText);
    } else if len > LONG_TEXT_CHARS {
        raise(LONG_TEXT_SCORE, ScoreRule::LongText);
    }
    if msg.role == MessageRole::System {
        raise(SYSTEM_SCORE, ScoreRule::SystemContext);
    }
    if msg.role == MessageRole::User {
        score = (score + USER_BONUS).min(1.0);
        rules.push(ScoreRule::UserIntent);
    }

    ScoreExplanation {
        score: score.clamp(0.0, 1.0),
        rules,
    }
}

// ── Repetition ─────────────────────────────────────────────────────

/// Positions of tool outputs that repeat the tool output right before them.
///
/// Position `i` is flagged when `i` and `i - 1` are both tool outputs and
/// either their first [`REPETITION_PREFIX_CHARS`] characters are identical,
/// or more than [`REPETITION_OVERLAP`] of the earlier output's first
/// [`REPETITION_LINES`] lines reappear in the later one once digits are
/// masked. The second check catches polling output where only counters and
/// timestamps change.
pub fn find_repetitive(messages: &[Message]) -> BTreeSet<usize> {
    let mut flagged = BTreeSet::new();

    for i in 1..messages.len() {
        let (prev, cur) = (&messages[i - 1], &messages[i]);
        if prev.role != MessageRole::Tool || cur.role != MessageRole::Tool {
            continue;
        }
        if is_repetition(&prev.text(), &cur.text()) {
            flagged.insert(i);
        }
    }

    flagged
}

fn is_repetition(earlier: &str, later: &str) -> bool {
    let same_prefix = earlier
        .chars()
        .take(REPETITION_PREFIX_CHARS)
        .eq(later.chars().take(REPETITION_PREFIX_CHARS));
    if same_prefix {
        return true;
    }

    let earlier_lines = normalized_head(earlier);
    if earlier_lines.is_empty() {
        return false;
    }
    let later_lines = normalized_head(later);
    let shared = earlier_lines.intersection(&later_lines).count();
    shared as f64 / earlier_lines.len() as f64 > REPETITION_OVERLAP
}

/// First few non-blank lines with every run of digits masked.
fn normalized_head(text: &str) -> HashSet<String> {
    text.lines()
        .take(REPETITION_LINES)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| DIGITS_RE.replace_all(l, "<n>").into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentPart, ImageUrl, ToolCall};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn acknowledgments_score_lowest() {
        for text in ["ok", "thanks.", "got it", "  Hey  ", "OK.", "sounds good"] {
            let msg = Message::user(text);
            assert!(approx(score(&msg), ACK_SCORE), "{text:?}");
            assert_eq!(explain(&msg).rules, vec![ScoreRule::Acknowledgment]);
        }
        // A second trailing period is not an acknowledgment.
        assert!(!approx(score(&Message::assistant_text("ok..")), ACK_SCORE));
    }

    #[test]
    fn empty_and_non_text_messages() {
        let empty = Message {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: None,
            tool_call_id: None,
            extra: Default::default(),
        };
        assert!(approx(score(&empty), EMPTY_SCORE));
        assert!(approx(score(&Message::user("   \n ")), EMPTY_SCORE));

        let image = Message::with_parts(
            MessageRole::User,
            vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "https://example.com/a.png".into(),
                },
            }],
        );
        assert!(approx(score(&image), NON_TEXT_SCORE));

        let call_only = Message::assistant_tool_calls(vec![ToolCall::new("c1", "ls", "{}")]);
        assert!(approx(score(&call_only), NON_TEXT_SCORE));
    }

    #[test]
    fn tool_output_and_invocations_are_fixed() {
        let out = Message::tool_result("c1", "error: something failed at src/main.rs:3");
        assert!(approx(score(&out), TOOL_OUTPUT_SCORE));

        let mut call = Message::assistant_text("Let me check ```the code```");
        call.tool_calls = Some(vec![ToolCall::new("c1", "read_file", "{}")]);
        assert!(approx(score(&call), TOOL_CALL_SCORE));
    }

    #[test]
    fn generic_assistant_text_is_baseline() {
        let msg = Message::assistant_text("Working through the remaining items now.");
        assert!(approx(score(&msg), BASELINE_SCORE));
        assert!(explain(&msg).rules.is_empty());
    }

    #[test]
    fn short_text_is_penalized() {
        let msg = Message::assistant_text("Will do shortly");
        assert!(approx(score(&msg), 0.25));
        assert_eq!(explain(&msg).rules, vec![ScoreRule::ShortText]);
    }

    #[test]
    fn fenced_code_scores_high() {
        let msg = Message::assistant_text("```\nx\n```");
        assert!(score(&msg) >= 0.8);
        assert!(!explain(&msg).rules.contains(&ScoreRule::ShortText));

        let long = Message::assistant_text(format!(
            "Here is the fix:\n```rust\nfn main() {{}}\n```\n{}",
            "filler ".repeat(50)
        ));
        assert!(score(&long) >= 0.8);
    }

    #[test]
    fn inline_code_needs_three_spans() {
        let two = Message::assistant_text("Rename `foo` to `bar` across the module please.");
        assert!(!explain(&two).rules.contains(&ScoreRule::InlineCode));

        let three =
            Message::assistant_text("Rename `foo` to `bar` and drop `baz` across the module.");
        assert!(approx(score(&three), INLINE_CODE_SCORE));
    }

    #[test]
    fn decisions_are_kept() {
        for text in [
            "We decided to go with sqlite for the cache layer.",
            "Always use tabs in this repository, not spaces.",
            "The naming convention here is snake_case for everything.",
            "I prefer small commits over one big squash.",
        ] {
            let msg = Message::assistant_text(text);
            assert!(approx(score(&msg), DECISION_SCORE), "{text:?}");
        }
    }

    #[test]
    fn errors_and_stack_frames() {
        let words = Message::assistant_text("The build threw an exception during linking.");
        assert!(approx(score(&words), ERROR_SCORE));

        let frame = Message::assistant_text(
            "Output was:\n  --> src/context/pruning.rs:120:9\nnothing else",
        );
        assert!(explain(&frame).rules.contains(&ScoreRule::ErrorTrace));

        let py = Message::assistant_text("File \"app/main.py\", line 12, in <module>");
        assert!(explain(&py).rules.contains(&ScoreRule::ErrorTrace));

        let go = Message::assistant_text("goroutine 1 [running]:\n  ./cmd/server/main.go:42 +0x1d");
        assert!(explain(&go).rules.contains(&ScoreRule::ErrorTrace));

        let js = Message::assistant_text("Stack:\n    at handler (/srv/app/index.js:10:5)");
        assert!(explain(&js).rules.contains(&ScoreRule::ErrorTrace));

        // A bare host and port is not a source location.
        let host = Message::assistant_text("The service answered from\nhost.dev:8080\nwithin budget.");
        assert!(!explain(&host).rules.contains(&ScoreRule::ErrorTrace));
        assert!(approx(score(&host), BASELINE_SCORE));
    }

    #[test]
    fn urls_and_paths_are_references() {
        let url = Message::assistant_text("The docs live at https://docs.rs/regex for details.");
        assert!(approx(score(&url), REFERENCE_SCORE));

        let path = Message::assistant_text("The handler is defined in src/api/router.rs today.");
        assert!(approx(score(&path), REFERENCE_SCORE));

        let plain = Message::assistant_text("Read and/or write whichever is simpler for now.");
        assert!(!explain(&plain).rules.contains(&ScoreRule::Reference));

        let ratio = Message::assistant_text("Roughly 3/4.5 of the runs passed on the second try.");
        assert!(!explain(&ratio).rules.contains(&ScoreRule::Reference));
        assert!(approx(score(&ratio), BASELINE_SCORE));
    }

    #[test]
    fn length_bonuses() {
        let long = Message::assistant_text("word ".repeat(120));
        assert!(approx(score(&long), LONG_TEXT_SCORE));

        let very_long = Message::assistant_text("word ".repeat(450));
        assert!(approx(score(&very_long), VERY_LONG_TEXT_SCORE));
    }

    #[test]
    fn role_adjustments() {
        let sys = Message::system("You are a careful assistant for this team.");
        assert!(approx(score(&sys), SYSTEM_SCORE));

        let user = Message::user("Please look into the flaky test next.");
        assert!(approx(score(&user), BASELINE_SCORE + USER_BONUS));

        let user_code = Message::user("```\nfn a() {}\n```\nwe decided on this, error at https://x.io");
        assert!(score(&user_code) <= 1.0);
        assert!(approx(score(&user_code), 0.9));
    }

    #[test]
    fn scoring_is_deterministic() {
        let msg = Message::user("Fix the panic in `parse` from src/lib.rs, we must ship today.");
        assert_eq!(score(&msg), score(&msg.clone()));
        assert_eq!(explain(&msg), explain(&msg));
    }

    #[test]
    fn identical_prefix_is_repetitive() {
        let body = "x".repeat(300);
        let messages = vec![
            Message::tool_result("c1", format!("{body}tail one")),
            Message::tool_result("c2", format!("{body}tail two")),
        ];
        assert_eq!(find_repetitive(&messages), BTreeSet::from([1]));
    }

    #[test]
    fn numeric_noise_is_ignored() {
        let messages = vec![
            Message::tool_result("c1", "jobs: 3 running\nqueue depth 17\nuptime 12.5s\nok"),
            Message::tool_result("c2", "jobs: 4 running\nqueue depth 9\nuptime 13.75s\nok"),
        ];
        assert!(find_repetitive(&messages).contains(&1));
    }

    #[test]
    fn different_output_is_not_repetitive() {
        let messages = vec![
            Message::tool_result("c1", "src/a.rs\nsrc/b.rs\nsrc/c.rs"),
            Message::tool_result("c2", "README.md\nCargo.toml\nsrc/c.rs"),
        ];
        assert!(find_repetitive(&messages).is_empty());
    }

    #[test]
    fn only_adjacent_tool_outputs_are_compared() {
        let messages = vec![
            Message::tool_result("c1", "same output"),
            Message::assistant_text("same output"),
            Message::tool_result("c2", "same output"),
        ];
        assert!(find_repetitive(&messages).is_empty());
    }
}
