//! Tracks one conversation's message history, system-prompt fingerprints, and
//! token accounting (SS4.A). Deliberately small and LLM-agnostic beyond the
//! `ChatMessage` type it stores — the turn engine owns prompt construction.

use core_llm::ChatMessage;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

/// First 8 bytes of a SHA-256 digest. Cheap, allocation-free equality checks
/// for "did the system prompt/rules/project summary change since last turn",
/// favoring a fixed-size array over a hex `String` the way the rest of this
/// core prefers typed, copyable identifiers.
pub type Fingerprint = [u8; 8];

pub fn fingerprint(text: &str) -> Fingerprint {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ContextFingerprints {
    system: Option<Fingerprint>,
    rules: Option<Fingerprint>,
    project: Option<Fingerprint>,
    sent: bool,
}

struct SessionState {
    messages: Vec<ChatMessage>,
    fingerprints: ContextFingerprints,
    total_prompt_tokens: u64,
    message_cap: usize,
}

/// One conversation's rolling transcript plus the bookkeeping the turn engine
/// needs to decide whether to re-send the system prompt and how full the
/// context window is getting. Internally guarded by an `RwLock`: prompt
/// building takes the read side, `add_message`/`reset` take the write side.
pub struct SessionTracker {
    state: RwLock<SessionState>,
}

impl SessionTracker {
    pub fn new(message_cap: usize) -> Self {
        Self {
            state: RwLock::new(SessionState {
                messages: Vec::new(),
                fingerprints: ContextFingerprints::default(),
                total_prompt_tokens: 0,
                message_cap,
            }),
        }
    }

    /// True when the system prompt has never been sent, or any of the three
    /// fingerprints (system/rules/project) differs from what was last sent.
    pub async fn needs_context_refresh(&self, system: &str, rules: &str, project: &str) -> bool {
        let state = self.state.read().await;
        if !state.fingerprints.sent {
            return true;
        }
        state.fingerprints.system != Some(fingerprint(system))
            || state.fingerprints.rules != Some(fingerprint(rules))
            || state.fingerprints.project != Some(fingerprint(project))
    }

    pub async fn mark_context_sent(&self, system: &str, rules: &str, project: &str) {
        let mut state = self.state.write().await;
        state.fingerprints = ContextFingerprints {
            system: Some(fingerprint(system)),
            rules: Some(fingerprint(rules)),
            project: Some(fingerprint(project)),
            sent: true,
        };
    }

    /// Appends a message; drops from the head once the configured cap is
    /// exceeded, so the transcript a turn sees is always bounded.
    pub async fn add_message(&self, message: ChatMessage) {
        let mut state = self.state.write().await;
        state.messages.push(message);
        let cap = state.message_cap;
        if state.messages.len() > cap {
            let overflow = state.messages.len() - cap;
            state.messages.drain(0..overflow);
        }
    }

    pub async fn update_tokens(&self, prompt_tokens: u64) {
        self.state.write().await.total_prompt_tokens += prompt_tokens;
    }

    pub async fn total_prompt_tokens(&self) -> u64 {
        self.state.read().await.total_prompt_tokens
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().await.messages.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.len()
    }

    /// Replaces the transcript and clears fingerprints, so the next turn
    /// re-sends the full system prompt. Token accounting is reset too.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        state.messages.clear();
        state.fingerprints = ContextFingerprints::default();
        state.total_prompt_tokens = 0;
    }

    /// Drops the oldest `count` messages from the front, used by the context-
    /// length retry path (trims the transcript the same round memory itself
    /// gets trimmed, see `core-memory`).
    pub async fn drop_oldest(&self, count: usize) {
        let mut state = self.state.write().await;
        let n = count.min(state.messages.len());
        state.messages.drain(0..n);
    }

    /// Drops the newest `count` messages from the tail, used by the turn
    /// engine's truncation-continuation to remove the `assistant(partial)`/
    /// `user("Continue…")` scaffolding it appended for a single follow-up
    /// call, without touching the system prompt or earlier transcript.
    pub async fn drop_newest(&self, count: usize) {
        let mut state = self.state.write().await;
        let n = count.min(state.messages.len());
        let cut = state.messages.len() - n;
        state.messages.truncate(cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn never_sent_needs_refresh() {
        let tracker = SessionTracker::new(100);
        assert!(tracker.needs_context_refresh("sys", "rules", "proj").await);
    }

    #[tokio::test]
    async fn unchanged_context_does_not_need_refresh() {
        let tracker = SessionTracker::new(100);
        tracker.mark_context_sent("sys", "rules", "proj").await;
        assert!(!tracker.needs_context_refresh("sys", "rules", "proj").await);
    }

    #[tokio::test]
    async fn changed_system_prompt_needs_refresh() {
        let tracker = SessionTracker::new(100);
        tracker.mark_context_sent("sys", "rules", "proj").await;
        assert!(tracker.needs_context_refresh("sys v2", "rules", "proj").await);
    }

    #[tokio::test]
    async fn changed_rules_or_project_needs_refresh() {
        let tracker = SessionTracker::new(100);
        tracker.mark_context_sent("sys", "rules", "proj").await;
        assert!(tracker.needs_context_refresh("sys", "rules v2", "proj").await);
        assert!(tracker.needs_context_refresh("sys", "rules", "proj v2").await);
    }

    #[tokio::test]
    async fn add_message_drops_from_the_head_past_cap() {
        let tracker = SessionTracker::new(2);
        tracker.add_message(ChatMessage::user("one")).await;
        tracker.add_message(ChatMessage::user("two")).await;
        tracker.add_message(ChatMessage::user("three")).await;
        let messages = tracker.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.as_deref(), Some("two"));
        assert_eq!(messages[1].content.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn update_tokens_accumulates() {
        let tracker = SessionTracker::new(100);
        tracker.update_tokens(50).await;
        tracker.update_tokens(75).await;
        assert_eq!(tracker.total_prompt_tokens().await, 125);
    }

    #[tokio::test]
    async fn reset_clears_messages_fingerprints_and_tokens() {
        let tracker = SessionTracker::new(100);
        tracker.add_message(ChatMessage::user("hi")).await;
        tracker.mark_context_sent("sys", "rules", "proj").await;
        tracker.update_tokens(10).await;

        tracker.reset().await;

        assert_eq!(tracker.message_count().await, 0);
        assert_eq!(tracker.total_prompt_tokens().await, 0);
        assert!(tracker.needs_context_refresh("sys", "rules", "proj").await);
    }

    #[tokio::test]
    async fn drop_oldest_removes_from_the_front() {
        let tracker = SessionTracker::new(100);
        tracker.add_message(ChatMessage::user("a")).await;
        tracker.add_message(ChatMessage::user("b")).await;
        tracker.add_message(ChatMessage::user("c")).await;
        tracker.drop_oldest(2).await;
        let messages = tracker.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn drop_newest_removes_from_the_tail_leaving_the_system_prompt() {
        let tracker = SessionTracker::new(100);
        tracker.add_message(ChatMessage::system("sys")).await;
        tracker.add_message(ChatMessage::user("a")).await;
        tracker.add_message(ChatMessage::assistant("partial")).await;
        tracker.add_message(ChatMessage::user("Continue exactly where you left off.")).await;
        tracker.drop_newest(2).await;

        let messages = tracker.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.as_deref(), Some("sys"));
        assert_eq!(messages[1].content.as_deref(), Some("a"));
    }

    #[test]
    fn fingerprint_is_stable_and_distinguishes_inputs() {
        assert_eq!(fingerprint("a"), fingerprint("a"));
        assert_ne!(fingerprint("a"), fingerprint("b"));
    }
}
