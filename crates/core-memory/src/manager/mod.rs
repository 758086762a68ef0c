//! Tiered memory manager: short-term conversation turns, a working set of
//! file context, and long-term durable facts, grounded on `aigent-runtime`'s
//! `MemoryStore` (O(1)-indexed append store) and `MemoryEventLog`
//! (crash-safe JSONL persistence) — generalized from its original 6-tier
//! enum down to the three tiers this design calls for.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use core_config::MemoryConfig;

mod aging;
mod compression;
mod retrieval;

use crate::event_log::MemoryEventLog;
use crate::schema::MemoryTier;
use crate::store::MemoryStore;

#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub total: usize,
    pub short: usize,
    pub working: usize,
    pub long: usize,
}

pub struct MemoryManager {
    pub(crate) store: MemoryStore,
    event_log: Option<MemoryEventLog>,
    max_short: usize,
    max_working: usize,
    max_long: usize,
}

impl Default for MemoryManager {
    fn default() -> Self {
        let limits = MemoryConfig::default();
        Self {
            store: MemoryStore::default(),
            event_log: None,
            max_short: limits.max_short,
            max_working: limits.max_working,
            max_long: limits.max_long,
        }
    }
}

impl MemoryManager {
    /// Loads the long-term tier from a persistent event log, replaying every
    /// record in order. Short and working tiers always start empty — they
    /// are never written to the log (SS4.B: "short/working are ephemeral").
    pub async fn with_event_log(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let event_log = MemoryEventLog::new(path.clone());
        let mut manager = Self { event_log: Some(event_log), ..Self::default() };

        let events = manager.event_log.as_ref().expect("just set").load()?;
        let event_count = events.len();
        for event in events {
            manager.store.insert(event.entry);
        }

        let stats = manager.stats();
        info!(path = %path.display(), events = event_count, long = stats.long, "long-term memory loaded");
        Ok(manager)
    }

    /// Applies per-tier size maxima from config (SS4.B "counts per tier
    /// never exceed the configured maxima"). Does not retroactively evict;
    /// the new maxima only take effect on the next `add_*` call.
    pub fn set_limits(&mut self, limits: &MemoryConfig) {
        self.max_short = limits.max_short;
        self.max_working = limits.max_working;
        self.max_long = limits.max_long;
    }

    pub fn all(&self) -> &[crate::schema::MemoryEntry] {
        self.store.all()
    }

    pub fn entries_by_tier(&self, tier: MemoryTier) -> Vec<&crate::schema::MemoryEntry> {
        self.store.all().iter().filter(|e| e.tier == tier).collect()
    }

    pub fn stats(&self) -> MemoryStats {
        let mut s = MemoryStats { total: self.store.len(), ..Default::default() };
        for entry in self.store.all() {
            match entry.tier {
                MemoryTier::Short => s.short += 1,
                MemoryTier::Working => s.working += 1,
                MemoryTier::Long => s.long += 1,
            }
        }
        s
    }

    pub(crate) fn event_log(&self) -> Option<&MemoryEventLog> {
        self.event_log.as_ref()
    }

    /// Enforces `tier`'s configured maximum by evicting the lowest-relevance
    /// (oldest-`last_touched`-tie-broken) entries once it is exceeded.
    /// `Long`-tier decisions are exempt — they survive eviction the same way
    /// they survive compression (SS4.B "decisions... survive compression").
    pub(crate) fn enforce_tier_cap(&mut self, tier: MemoryTier) {
        let max = match tier {
            MemoryTier::Short => self.max_short,
            MemoryTier::Working => self.max_working,
            MemoryTier::Long => self.max_long,
        };

        let count = self.store.all().iter().filter(|e| e.tier == tier).count();
        if count <= max {
            return;
        }
        let over = count - max;

        let removed = self.store.evict_lowest(over, |e| {
            e.tier == tier && !(tier == MemoryTier::Long && e.source == "decision")
        });
        if !removed.is_empty() {
            info!(tier = ?tier, evicted = removed.len(), max, "evicted over-cap entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MemoryEntry;

    #[test]
    fn default_manager_is_empty() {
        let manager = MemoryManager::default();
        assert_eq!(manager.stats().total, 0);
    }

    #[test]
    fn set_limits_applies_new_maxima() {
        let mut manager = MemoryManager::default();
        manager.set_limits(&MemoryConfig { max_short: 2, ..MemoryConfig::default() });
        manager.add_message("user", "one");
        manager.add_message("user", "two");
        manager.add_message("user", "three");
        assert_eq!(manager.entries_by_tier(MemoryTier::Short).len(), 2);
    }

    #[test]
    fn enforce_tier_cap_evicts_lowest_relevance_first() {
        let mut manager = MemoryManager::default();
        manager.set_limits(&MemoryConfig { max_short: 2, ..MemoryConfig::default() });

        manager.store.insert(MemoryEntry::new(MemoryTier::Short, "low", "user", 0.1));
        manager.store.insert(MemoryEntry::new(MemoryTier::Short, "high", "user", 0.9));
        manager.enforce_tier_cap(MemoryTier::Short);
        manager.store.insert(MemoryEntry::new(MemoryTier::Short, "mid", "user", 0.5));
        manager.enforce_tier_cap(MemoryTier::Short);

        let remaining: Vec<&str> = manager.entries_by_tier(MemoryTier::Short).iter().map(|e| e.content.as_str()).collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&"low"));
    }

    #[tokio::test]
    async fn decisions_are_exempt_from_long_term_eviction() {
        let mut manager = MemoryManager::default();
        manager.set_limits(&MemoryConfig { max_long: 1, ..MemoryConfig::default() });

        manager.add_decision("decision one", vec![]).await.unwrap();
        manager.add_decision("decision two", vec![]).await.unwrap();

        let long = manager.entries_by_tier(MemoryTier::Long);
        assert_eq!(long.len(), 2, "decisions must survive being over the long-term cap");
    }
}
