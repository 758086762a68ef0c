//! Compression of short-term history into a long-term summary, and
//! save/load persistence for the long-term tier — grounded on
//! `aigent-runtime`'s `deduplicate_by_content`/`compact_episodic`
//! retain-then-persist pattern and `MemoryEventLog::overwrite`'s crash-safe
//! rewrite.

use anyhow::Result;

use crate::event_log::MemoryEventLog;
use crate::schema::{MemoryEntry, MemoryTier};

use super::MemoryManager;

impl MemoryManager {
    /// Returns the oldest contiguous prefix of short-term items, once their
    /// count exceeds `threshold`; empty if below.
    pub fn items_to_compress(&self, threshold: usize) -> Vec<MemoryEntry> {
        let mut short: Vec<&MemoryEntry> =
            self.store.all().iter().filter(|e| e.tier == MemoryTier::Short).collect();
        if short.len() <= threshold {
            return Vec::new();
        }

        short.sort_by_key(|e| e.insertion_seq);
        let overflow = short.len() - threshold;
        short.into_iter().take(overflow).cloned().collect()
    }

    /// Deletes `items` from short-term and inserts `summary_text` as a new
    /// `Long`-tier entry, persisting it if an event log is attached.
    pub async fn compress_with(&mut self, items: &[MemoryEntry], summary_text: impl Into<String>) -> Result<()> {
        let ids: std::collections::HashSet<_> = items.iter().map(|e| e.id).collect();
        self.store.retain(|e| !ids.contains(&e.id));

        let summary = MemoryEntry::new(MemoryTier::Long, summary_text, "compression", 1.0);
        self.store.insert(summary.clone());
        self.enforce_tier_cap(MemoryTier::Long);

        if let Some(log) = self.event_log() {
            log.append(&summary).await?;
        }
        Ok(())
    }

    /// Appends a durable long-term item (a decision or distilled insight).
    /// Survives compression and, since `enforce_tier_cap` exempts
    /// `source == "decision"` entries from `Long`-tier eviction, survives
    /// being over the long-term cap too. Persisted immediately if an event
    /// log is attached.
    pub async fn add_decision(&mut self, text: impl Into<String>, tags: Vec<String>) -> Result<()> {
        let mut entry = MemoryEntry::new(MemoryTier::Long, text, "decision", 1.0);
        entry.tags = tags;
        self.store.insert(entry.clone());
        self.enforce_tier_cap(MemoryTier::Long);
        if let Some(log) = self.event_log() {
            log.append(&entry).await?;
        }
        Ok(())
    }

    /// Persists the current long-term tier to the attached event log,
    /// replacing its contents wholesale (atomic rename, see
    /// `MemoryEventLog::overwrite`). A no-op if no log is attached.
    pub async fn save(&self) -> Result<()> {
        let Some(log) = self.event_log() else { return Ok(()) };
        let events: Vec<_> = self
            .store
            .all()
            .iter()
            .filter(|e| e.tier == MemoryTier::Long)
            .map(|entry| crate::event_log::MemoryRecordEvent { recorded_at: entry.last_touched, entry: entry.clone() })
            .collect();
        log.overwrite(&events).await
    }

    /// Replaces the long-term tier in memory with the contents of `path`'s
    /// event log. Short/working tiers are untouched.
    pub async fn load(&mut self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let log = MemoryEventLog::new(path.as_ref().to_path_buf());
        let events = log.load()?;
        self.store.retain(|e| e.tier != MemoryTier::Long);
        for event in events {
            self.store.insert(event.entry);
        }
        Ok(())
    }
}
