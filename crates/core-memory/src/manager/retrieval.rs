//! Message/file ingestion and prompt-context formatting, grounded on
//! `aigent-runtime`'s `respond_and_remember_stream` context-block assembly
//! (`runtime/chat.rs`) and `MemoryStore::upsert_by_path`-style keyed
//! insertion.

use crate::schema::{MemoryEntry, MemoryTier, truncate_str};

use super::MemoryManager;

impl MemoryManager {
    /// Appends a short-term message (role is folded into `source`, e.g.
    /// `"user"`/`"assistant"`) with full relevance. Evicts the lowest-
    /// relevance short-term entry once `max_short` is exceeded.
    pub fn add_message(&mut self, role: impl Into<String>, text: impl Into<String>) {
        self.store.insert(MemoryEntry::new(MemoryTier::Short, text, role, 1.0));
        self.enforce_tier_cap(MemoryTier::Short);
    }

    /// Upserts a `Working`-tier item keyed by `path`. Evicts the lowest-
    /// relevance working entry once `max_working` is exceeded.
    pub fn add_file(&mut self, path: impl Into<String>, body: impl Into<String>, initial_relevance: f32) {
        let path = path.into();
        let entry = MemoryEntry::new(MemoryTier::Working, body, "file", initial_relevance);
        self.store.upsert_by_path(&path, entry);
        self.enforce_tier_cap(MemoryTier::Working);
    }

    /// The short-term message history in insertion order.
    pub fn get_messages(&self) -> Vec<&MemoryEntry> {
        let mut messages: Vec<&MemoryEntry> =
            self.store.all().iter().filter(|e| e.tier == MemoryTier::Short).collect();
        messages.sort_by_key(|e| e.insertion_seq);
        messages
    }

    /// A formatted digest of long-term items for prompt injection, newest
    /// first, each truncated to keep the digest bounded.
    pub fn get_context(&self) -> String {
        let mut items: Vec<&MemoryEntry> =
            self.store.all().iter().filter(|e| e.tier == MemoryTier::Long).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if items.is_empty() {
            return "(no long-term memory yet)".to_string();
        }

        items
            .iter()
            .map(|e| format!("- [{}] {}", e.source, truncate_str(&e.content, 300)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_message_and_get_messages_preserve_order() {
        let mut manager = MemoryManager::default();
        manager.add_message("user", "hello");
        manager.add_message("assistant", "hi");

        let messages = manager.get_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].content, "hi");
    }

    #[test]
    fn add_file_upserts_same_path() {
        let mut manager = MemoryManager::default();
        manager.add_file("a.rs", "fn main() {}", 1.0);
        manager.add_file("a.rs", "fn main() { println!(); }", 0.8);

        let working = manager.entries_by_tier(MemoryTier::Working);
        assert_eq!(working.len(), 1);
        assert_eq!(working[0].content, "fn main() { println!(); }");
    }

    #[tokio::test]
    async fn get_context_reflects_long_term_decisions() {
        let mut manager = MemoryManager::default();
        assert_eq!(manager.get_context(), "(no long-term memory yet)");

        manager.add_decision("use sha2 for fingerprints", vec!["design".into()]).await.unwrap();
        assert!(manager.get_context().contains("use sha2 for fingerprints"));
    }
}
