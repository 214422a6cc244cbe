//! Session logs and the store seam pruning reads from and writes back to.
//!
//! A session log is newline-delimited JSON, one [`Message`] per line. Lines
//! that fail to parse are skipped with a warning rather than failing the
//! whole read, and an unreadable log reads as empty. Rewrites go through a
//! temp file and a rename so a crash never leaves a half-written log.
//!
//! The pruning engine never touches storage itself. [`MessageStore`] is the
//! boundary: [`prune_store`] loads a snapshot, prunes it, and hands the kept
//! messages back through [`MessageStore::replace`]. Callers that prune the
//! same store from several places are responsible for serializing those
//! load/replace cycles.

use crate::Message;
use crate::context::policy::PrunePolicy;
use crate::context::pruning::{PruneResult, prune};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ── JSONL I/O ──────────────────────────────────────────────────────

/// Parse a JSONL session log. Blank lines are ignored; malformed lines are
/// skipped.
pub fn parse_session_log(raw: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    for (n, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(line) {
            Ok(msg) => messages.push(msg),
            Err(e) => warn!("Skipping malformed session log line {}: {e}", n + 1),
        }
    }
    messages
}

/// Read a JSONL session log from disk.
///
/// A missing or unreadable file is logged and treated as an empty log.
pub fn read_session_log(path: &Path) -> Vec<Message> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let messages = parse_session_log(&raw);
            debug!(
                "Read {} message(s) from {}",
                messages.len(),
                path.display()
            );
            messages
        }
        Err(e) => {
            warn!("Failed to read session log {}: {e}", path.display());
            Vec::new()
        }
    }
}

/// Atomic write: serialize to a temp file next to `path`, then rename into place.
pub fn write_session_log(path: &Path, messages: &[Message]) -> Result<(), String> {
    let file_name = path
        .file_name()
        .ok_or_else(|| format!("Invalid session log path: {}", path.display()))?
        .to_string_lossy();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut out = String::new();
    for msg in messages {
        let line =
            serde_json::to_string(msg).map_err(|e| format!("Failed to serialize message: {e}"))?;
        out.push_str(&line);
        out.push('\n');
    }

    std::fs::write(&tmp_path, out)
        .map_err(|e| format!("Failed to write temp session log: {e}"))?;
    std::fs::rename(&tmp_path, path).map_err(|e| format!("Failed to rename session log: {e}"))?;

    Ok(())
}

// ── Stores ─────────────────────────────────────────────────────────

/// Where messages come from and where a pruned list goes back to.
pub trait MessageStore {
    /// Snapshot of the current messages.
    fn load(&self) -> Vec<Message>;

    /// Replace every stored message with `messages`.
    fn replace(&mut self, messages: &[Message]) -> Result<(), String>;
}

/// A store backed by a plain vector, for live conversations and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    messages: Vec<Message>,
}

impl InMemoryStore {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

impl MessageStore for InMemoryStore {
    fn load(&self) -> Vec<Message> {
        self.messages.clone()
    }

    fn replace(&mut self, messages: &[Message]) -> Result<(), String> {
        self.messages = messages.to_vec();
        Ok(())
    }
}

/// A store backed by a JSONL session log on disk.
///
/// With backups enabled, [`replace`](MessageStore::replace) first copies the
/// current log to `<name>.<timestamp>.bak` in the same directory.
#[derive(Debug, Clone)]
pub struct JsonlSessionLog {
    path: PathBuf,
    backup: bool,
}

impl JsonlSessionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup: false,
        }
    }

    /// Keep a timestamped copy of the log before each rewrite.
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S");
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "session.jsonl".to_string());
        self.path.with_file_name(format!("{name}.{stamp}.bak"))
    }
}

impl MessageStore for JsonlSessionLog {
    fn load(&self) -> Vec<Message> {
        read_session_log(&self.path)
    }

    fn replace(&mut self, messages: &[Message]) -> Result<(), String> {
        if self.backup && self.path.exists() {
            let backup = self.backup_path();
            std::fs::copy(&self.path, &backup)
                .map_err(|e| format!("Failed to back up session log: {e}"))?;
            info!("Backed up session log to {}", backup.display());
        }
        write_session_log(&self.path, messages)
    }
}

// ── Load / prune / replace ─────────────────────────────────────────

/// Prune a store in place.
///
/// Without `force`, nothing happens unless the policy's trigger says so
/// ([`PrunePolicy::should_prune`]). The store is only rewritten when at least
/// one message was removed.
pub fn prune_store<S: MessageStore + ?Sized>(
    store: &mut S,
    policy: &PrunePolicy,
    aggressiveness: f64,
    force: bool,
) -> Result<PruneResult, String> {
    let messages = store.load();
    prune_snapshot(store, &messages, policy, aggressiveness, force)
}

/// Like [`prune_store`], but prunes a snapshot the caller already loaded
/// from `store` instead of loading it again.
pub fn prune_snapshot<S: MessageStore + ?Sized>(
    store: &mut S,
    messages: &[Message],
    policy: &PrunePolicy,
    aggressiveness: f64,
    force: bool,
) -> Result<PruneResult, String> {
    if !force && !policy.should_prune(messages.len()) {
        debug!(
            "{} message(s), trigger at {}: not pruning",
            messages.len(),
            policy.max_messages
        );
        return Ok(PruneResult::unchanged(messages));
    }

    let result = prune(messages, policy, aggressiveness);
    if !result.is_noop() {
        store.replace(&result.kept)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageRole, ToolCall};

    fn sample() -> Vec<Message> {
        vec![
            Message::system("You are a coding agent."),
            Message::user("List the files."),
            Message::assistant_tool_calls(vec![ToolCall::new("c1", "ls", "{}")]),
            Message::tool_result("c1", "a.rs\nb.rs"),
            Message::assistant_text("There are two files."),
        ]
    }

    #[test]
    fn parse_skips_malformed_and_blank_lines() {
        let raw = concat!(
            "{\"role\":\"user\",\"content\":\"hi\"}\n",
            "\n",
            "{not json\n",
            "{\"role\":\"wizard\",\"content\":\"x\"}\n",
            "{\"role\":\"assistant\",\"content\":\"hello\"}\n",
        );
        let messages = parse_session_log(raw);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].text(), "hello");
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_session_log(&dir.path().join("nope.jsonl")).is_empty());
    }

    #[test]
    fn write_then_read_preserves_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let messages = sample();

        write_session_log(&path, &messages).unwrap();
        assert_eq!(read_session_log(&path), messages);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), messages.len());
        assert!(!dir.path().join(".session.jsonl.tmp").exists());
    }

    #[test]
    fn jsonl_store_backs_up_before_replace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_session_log(&path, &sample()).unwrap();

        let mut store = JsonlSessionLog::new(&path).with_backup(true);
        store.replace(&sample()[..2]).unwrap();

        assert_eq!(store.load().len(), 2);
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(read_session_log(&backups[0].path()).len(), 5);
    }

    #[test]
    fn prune_store_respects_trigger() {
        let messages: Vec<Message> = (0..30)
            .map(|i| Message::assistant_text(format!("Moving on to step {i} of the task now.")))
            .collect();
        let policy = PrunePolicy::new()
            .with_max_messages(40)
            .with_target_messages(20)
            .with_keep_first(2)
            .with_keep_recent(4);

        let mut store = InMemoryStore::new(messages);
        let result = prune_store(&mut store, &policy, 1.0, false).unwrap();
        assert!(result.is_noop());
        assert_eq!(store.messages().len(), 30);

        let forced = prune_store(&mut store, &policy, 1.0, true).unwrap();
        assert_eq!(forced.removed_count, 10);
        assert_eq!(store.messages().len(), 20);
    }

    #[test]
    fn prune_store_rewrites_jsonl_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let messages: Vec<Message> = (0..12)
            .map(|i| Message::assistant_text(format!("Moving on to step {i} of the task now.")))
            .collect();
        write_session_log(&path, &messages).unwrap();

        let policy = PrunePolicy::new()
            .with_max_messages(10)
            .with_target_messages(8)
            .with_keep_first(1)
            .with_keep_recent(2);
        let mut store = JsonlSessionLog::new(&path);
        let result = prune_store(&mut store, &policy, 1.0, false).unwrap();

        assert_eq!(result.removed_count, 4);
        assert_eq!(read_session_log(&path), result.kept);
    }

    #[test]
    fn prune_keeps_unmodelled_data_on_surviving_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let head = r#"{"role":"user","content":[{"type":"input_audio","input_audio":{"data":"QUJD","format":"wav"}},{"type":"text","text":"listen"}],"name":"alice"}"#;
        let mut raw = format!("{head}\n");
        for i in 0..20 {
            raw.push_str(&format!(
                "{{\"role\":\"assistant\",\"content\":\"Moving on to step {i} of the task now.\"}}\n"
            ));
        }
        std::fs::write(&path, raw).unwrap();

        let policy = PrunePolicy::new()
            .with_max_messages(10)
            .with_target_messages(5)
            .with_keep_first(1)
            .with_keep_recent(2);
        let mut store = JsonlSessionLog::new(&path);
        let result = prune_store(&mut store, &policy, 1.0, false).unwrap();
        assert_eq!(result.removed_count, 16);

        let rewritten = std::fs::read_to_string(&path).unwrap();
        let first = rewritten.lines().next().unwrap();
        let expected: serde_json::Value = serde_json::from_str(head).unwrap();
        let actual: serde_json::Value = serde_json::from_str(first).unwrap();
        assert_eq!(actual, expected);
    }

    /// Counts loads so callers can check how often a store is read.
    struct CountingStore {
        inner: InMemoryStore,
        loads: std::cell::Cell<usize>,
    }

    impl MessageStore for CountingStore {
        fn load(&self) -> Vec<Message> {
            self.loads.set(self.loads.get() + 1);
            self.inner.load()
        }

        fn replace(&mut self, messages: &[Message]) -> Result<(), String> {
            self.inner.replace(messages)
        }
    }

    #[test]
    fn prune_snapshot_does_not_reload_the_store() {
        let messages: Vec<Message> = (0..30)
            .map(|i| Message::assistant_text(format!("Moving on to step {i} of the task now.")))
            .collect();
        let policy = PrunePolicy::new()
            .with_target_messages(20)
            .with_keep_first(2)
            .with_keep_recent(4);
        let mut store = CountingStore {
            inner: InMemoryStore::new(messages),
            loads: std::cell::Cell::new(0),
        };

        let snapshot = store.load();
        let result = prune_snapshot(&mut store, &snapshot, &policy, 1.0, true).unwrap();
        assert_eq!(store.loads.get(), 1);
        assert_eq!(result.original_count, snapshot.len());
        assert_eq!(store.inner.messages(), result.kept.as_slice());

        prune_store(&mut store, &policy, 1.0, true).unwrap();
        assert_eq!(store.loads.get(), 2);
    }
}
