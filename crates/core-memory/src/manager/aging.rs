//! Aging and emergency-trim passes, grounded on `aigent-runtime`'s
//! `run_forgetting_pass` (age-and-confidence-gated retain) and
//! `MemoryStore::retain`.

use tracing::info;

use crate::schema::MemoryTier;

use super::MemoryManager;

impl MemoryManager {
    /// Decays every `Working`-tier entry's relevance by `rate` (a fraction in
    /// `[0, 1]`): `relevance <- relevance * (1 - rate)`. Entries whose
    /// relevance crosses below `floor` afterward are evicted.
    pub fn age_working(&mut self, rate: f32, floor: f32) -> usize {
        for entry in self.store.all_mut() {
            if entry.tier == MemoryTier::Working {
                entry.relevance = (entry.relevance * (1.0 - rate)).clamp(0.0, 1.0);
            }
        }

        let removed = self
            .store
            .retain(|e| e.tier != MemoryTier::Working || e.relevance >= floor);

        if removed > 0 {
            info!(removed, rate, floor, "aged working memory and evicted stale entries");
        }
        removed
    }

    /// Drops the oldest `fraction` (0.0-1.0) of short-term items as an
    /// emergency measure (e.g. after a context-length retry). `fraction <=
    /// 0` is a no-op; `fraction >= 1` empties the tier.
    pub fn trim_oldest(&mut self, fraction: f32) -> usize {
        if fraction <= 0.0 {
            return 0;
        }

        let short_count = self.entries_by_tier(MemoryTier::Short).len();
        if short_count == 0 {
            return 0;
        }

        let drop_count = if fraction >= 1.0 {
            short_count
        } else {
            ((short_count as f32) * fraction).ceil() as usize
        };

        let mut short_ids: Vec<_> = self
            .store
            .all()
            .iter()
            .filter(|e| e.tier == MemoryTier::Short)
            .map(|e| (e.insertion_seq, e.id))
            .collect();
        short_ids.sort_by_key(|(seq, _)| *seq);
        let to_drop: std::collections::HashSet<_> =
            short_ids.into_iter().take(drop_count).map(|(_, id)| id).collect();

        let removed = self.store.retain(|e| !to_drop.contains(&e.id));
        if removed > 0 {
            info!(removed, fraction, "trimmed oldest short-term memory");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use crate::schema::MemoryEntry;

    use super::*;

    #[test]
    fn age_working_decays_and_evicts_below_floor() {
        let mut manager = MemoryManager::default();
        let mut a = MemoryEntry::new(MemoryTier::Working, "a", "test", 0.2);
        a.path = Some("a.rs".into());
        manager.store.insert(a);

        let removed = manager.age_working(0.9, 0.05);
        assert_eq!(removed, 0);
        assert!(manager.entries_by_tier(MemoryTier::Working)[0].relevance < 0.2);

        manager.age_working(0.9, 0.05);
        assert_eq!(manager.entries_by_tier(MemoryTier::Working).len(), 0);
    }

    #[test]
    fn trim_oldest_zero_is_noop_one_empties() {
        let mut manager = MemoryManager::default();
        for i in 0..10 {
            manager.store.insert(MemoryEntry::new(MemoryTier::Short, format!("m{i}"), "test", 1.0));
        }

        assert_eq!(manager.trim_oldest(0.0), 0);
        assert_eq!(manager.entries_by_tier(MemoryTier::Short).len(), 10);

        assert_eq!(manager.trim_oldest(1.0), 10);
        assert_eq!(manager.entries_by_tier(MemoryTier::Short).len(), 0);
    }

    #[test]
    fn trim_oldest_partial_drops_oldest_first() {
        let mut manager = MemoryManager::default();
        for i in 0..10 {
            manager.store.insert(MemoryEntry::new(MemoryTier::Short, format!("m{i}"), "test", 1.0));
        }

        manager.trim_oldest(0.3);
        let remaining = manager.entries_by_tier(MemoryTier::Short);
        assert_eq!(remaining.len(), 7);
        assert!(remaining.iter().all(|e| e.content != "m0" && e.content != "m1" && e.content != "m2"));
    }
}
