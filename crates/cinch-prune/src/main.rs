//! Inspect and prune JSONL agent session logs.
//!
//! # Examples
//!
//! ```sh
//! # Message counts, token estimate, and whether the trigger has fired
//! cinch-prune stats .agents/session.jsonl
//!
//! # Importance score of every message, or the rules behind one of them
//! cinch-prune score .agents/session.jsonl
//! cinch-prune score .agents/session.jsonl --index 42
//!
//! # Preview a prune, then run it (keeps a timestamped backup)
//! cinch-prune prune .agents/session.jsonl --dry-run
//! cinch-prune prune .agents/session.jsonl --target-messages 80 --force
//!
//! # Prune harder than the policy target
//! cinch-prune prune .agents/session.jsonl --aggressiveness 2 --force
//! ```

use cinch_prune::context::budget::{DEFAULT_CHARS_PER_TOKEN, TokenDelta, estimate_tokens};
use cinch_prune::context::importance::explain;
use cinch_prune::context::pruning::{PruneResult, effective_target, score_all};
use cinch_prune::context::{PrunePolicy, find_repetitive};
use cinch_prune::session::{InMemoryStore, JsonlSessionLog, MessageStore, prune_snapshot};
use cinch_prune::{Message, MessageRole};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Inspect and prune JSONL agent session logs.
#[derive(Parser)]
#[command(name = "cinch-prune")]
struct Cli {
    /// Log verbosity (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show message counts, token estimate, and trigger status
    Stats {
        /// Path to the JSONL session log
        log: PathBuf,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Print importance scores
    Score {
        /// Path to the JSONL session log
        log: PathBuf,

        /// Explain the score of a single message
        #[arg(long)]
        index: Option<usize>,
    },

    /// Remove low-importance messages from the log
    Prune {
        /// Path to the JSONL session log
        log: PathBuf,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Scale the target down (>1 prunes harder, <1 gentler)
        #[arg(long, default_value_t = 1.0)]
        aggressiveness: f64,

        /// Prune even if the trigger size has not been reached
        #[arg(long)]
        force: bool,

        /// Report what would be removed without rewriting the log
        #[arg(long)]
        dry_run: bool,

        /// Do not keep a timestamped backup of the original log
        #[arg(long)]
        no_backup: bool,
    },
}

// ── Policy flags ───────────────────────────────────────────────────

#[derive(Args)]
struct PolicyArgs {
    /// JSON policy file (missing fields use defaults)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Prune when the log holds more than this many messages
    #[arg(long)]
    max_messages: Option<usize>,

    /// Message count to prune down to
    #[arg(long)]
    target_messages: Option<usize>,

    /// Importance floor (0.0 to 1.0); messages below it go first
    #[arg(long)]
    min_importance: Option<f64>,

    /// Leading messages that are never pruned
    #[arg(long)]
    keep_first: Option<usize>,

    /// Trailing messages that are never pruned
    #[arg(long)]
    keep_recent: Option<usize>,
}

impl PolicyArgs {
    /// Policy file (or defaults), then flag overrides, then clamping.
    fn resolve(&self) -> Result<PrunePolicy, String> {
        let mut policy = match &self.policy {
            Some(path) => PrunePolicy::from_json_file(path)?,
            None => PrunePolicy::default(),
        };
        if let Some(n) = self.max_messages {
            policy.max_messages = n;
        }
        if let Some(n) = self.target_messages {
            policy.target_messages = n;
        }
        if let Some(f) = self.min_importance {
            policy.min_importance = f;
        }
        if let Some(n) = self.keep_first {
            policy.keep_first = n;
        }
        if let Some(n) = self.keep_recent {
            policy.keep_recent = n;
        }
        Ok(policy.clamped())
    }
}

// ── Commands ───────────────────────────────────────────────────────

fn run_stats(log: &Path, policy: &PrunePolicy) -> String {
    let messages = JsonlSessionLog::new(log).load();
    let count = |role: MessageRole| messages.iter().filter(|m| m.role == role).count();

    let mut out = String::new();
    out.push_str(&format!("Messages: {}\n", messages.len()));
    for role in [
        MessageRole::System,
        MessageRole::User,
        MessageRole::Assistant,
        MessageRole::Tool,
    ] {
        out.push_str(&format!("  {:<10} {}\n", format!("{role}:"), count(role)));
    }
    out.push_str(&format!(
        "Tokens:   ~{}\n",
        estimate_tokens(&messages, DEFAULT_CHARS_PER_TOKEN)
    ));
    out.push_str(&format!(
        "Trigger:  {} messages (target {}), prune {}\n",
        policy.max_messages,
        effective_target(policy, 1.0),
        if policy.should_prune(messages.len()) {
            "needed"
        } else {
            "not needed"
        },
    ));
    out
}

fn run_score(log: &Path, index: Option<usize>) -> Result<String, String> {
    let messages = JsonlSessionLog::new(log).load();
    let scores = score_all(&messages);
    let repetitive = find_repetitive(&messages);

    if let Some(i) = index {
        let msg = messages
            .get(i)
            .ok_or_else(|| format!("index {i} out of range ({} messages)", messages.len()))?;
        let explanation = explain(msg);
        let mut out = format!(
            "#{i} {}: score {:.2}\n  rules: {:?}\n",
            msg.role, explanation.score, explanation.rules
        );
        if repetitive.contains(&i) {
            out.push_str(&format!(
                "  repeats the previous tool output, capped at {:.2}\n",
                scores[i]
            ));
        }
        return Ok(out);
    }

    let mut out = String::new();
    for (i, msg) in messages.iter().enumerate() {
        let flag = if repetitive.contains(&i) { " *" } else { "  " };
        out.push_str(&format!(
            "{i:>5}  {:<9}  {:.2}{flag}  {}\n",
            msg.role.to_string(),
            scores[i],
            preview(msg, 60)
        ));
    }
    if !repetitive.is_empty() {
        out.push_str("  * repeats the previous tool output\n");
    }
    Ok(out)
}

fn run_prune(
    log: &Path,
    policy: &PrunePolicy,
    aggressiveness: f64,
    force: bool,
    dry_run: bool,
    backup: bool,
) -> Result<String, String> {
    let mut store = JsonlSessionLog::new(log).with_backup(backup);
    let original = store.load();

    let result = if dry_run {
        prune_snapshot(
            &mut InMemoryStore::new(original.clone()),
            &original,
            policy,
            aggressiveness,
            force,
        )?
    } else {
        prune_snapshot(&mut store, &original, policy, aggressiveness, force)?
    };

    Ok(render_report(&original, &result, policy, dry_run))
}

fn render_report(
    original: &[Message],
    result: &PruneResult,
    policy: &PrunePolicy,
    dry_run: bool,
) -> String {
    if result.is_noop() {
        return format!(
            "Nothing to prune ({} messages, trigger at {}, target {}).\n",
            result.original_count, policy.max_messages, policy.target_messages
        );
    }

    let tokens = TokenDelta::between(original, &result.kept, DEFAULT_CHARS_PER_TOKEN);
    let stats = &result.removed_score_stats;
    let mut out = String::new();
    if dry_run {
        out.push_str("Dry run, log not modified.\n");
    }
    out.push_str(&format!(
        "Messages: {} -> {} (removed {})\n",
        result.original_count,
        result.kept.len(),
        result.removed_count
    ));
    out.push_str(&format!("Tokens:   {}\n", tokens.to_log_string()));
    out.push_str(&format!(
        "Removed scores: min {:.2}, max {:.2}, avg {:.2}\n",
        stats.min, stats.max, stats.avg
    ));
    out
}

/// First `max_chars` characters of a message's text on one line.
fn preview(msg: &Message, max_chars: usize) -> String {
    let text = msg.text();
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        return if msg.has_tool_calls() {
            let names: Vec<&str> = msg
                .tool_calls
                .iter()
                .flatten()
                .map(|c| c.function.name.as_str())
                .collect();
            format!("[calls: {}]", names.join(", "))
        } else if msg.has_non_text() {
            "[non-text]".to_string()
        } else {
            "[empty]".to_string()
        };
    }
    if flat.chars().count() > max_chars {
        let head: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        flat
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<String, String> {
    match cli.command {
        Command::Stats { log, policy } => Ok(run_stats(&log, &policy.resolve()?)),
        Command::Score { log, index } => run_score(&log, index),
        Command::Prune {
            log,
            policy,
            aggressiveness,
            force,
            dry_run,
            no_backup,
        } => run_prune(
            &log,
            &policy.resolve()?,
            aggressiveness,
            force,
            dry_run,
            !no_backup,
        ),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
