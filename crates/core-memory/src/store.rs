use std::collections::HashMap;

use uuid::Uuid;

use crate::schema::MemoryEntry;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<MemoryEntry>,
    /// Maps entry UUID -> index in `entries` for O(1) lookup.
    by_id: HashMap<Uuid, usize>,
    /// Maps `path` -> entry UUID, for `Working`-tier upsert-by-path.
    by_path: HashMap<String, Uuid>,
    next_seq: u64,
}

impl MemoryStore {
    /// Inserts a new entry, ignoring it if the same UUID is already present.
    /// Returns `true` if the entry was inserted.
    pub fn insert(&mut self, mut entry: MemoryEntry) -> bool {
        if self.by_id.contains_key(&entry.id) {
            return false;
        }

        entry.insertion_seq = self.next_seq;
        self.next_seq += 1;

        let idx = self.entries.len();
        self.by_id.insert(entry.id, idx);
        if let Some(path) = entry.path.clone() {
            self.by_path.insert(path, entry.id);
        }
        self.entries.push(entry);
        true
    }

    /// Inserts a new `Working`-tier entry keyed by `path`, replacing any
    /// existing entry for the same path in place (id and creation time are
    /// preserved; content, relevance and `last_touched` are refreshed).
    pub fn upsert_by_path(&mut self, path: &str, mut entry: MemoryEntry) {
        if let Some(&existing_id) = self.by_path.get(path) {
            if let Some(&idx) = self.by_id.get(&existing_id) {
                let created_at = self.entries[idx].created_at;
                let insertion_seq = self.entries[idx].insertion_seq;
                entry.id = existing_id;
                entry.created_at = created_at;
                entry.insertion_seq = insertion_seq;
                entry.path = Some(path.to_string());
                self.entries[idx] = entry;
                return;
            }
        }

        entry.path = Some(path.to_string());
        self.insert(entry);
    }

    pub fn all(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn all_mut(&mut self) -> &mut [MemoryEntry] {
        &mut self.entries
    }

    pub fn get(&self, id: Uuid) -> Option<&MemoryEntry> {
        self.by_id.get(&id).and_then(|&i| self.entries.get(i))
    }

    pub fn get_by_path(&self, path: &str) -> Option<&MemoryEntry> {
        self.by_path.get(path).and_then(|id| self.get(*id))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_id.clear();
        self.by_path.clear();
    }

    /// Retains entries matching `keep`, rebuilding both indices. Returns the
    /// number of entries removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&MemoryEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|entry| keep(entry));
        self.rebuild_indices();
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() < before {
            self.rebuild_indices();
            true
        } else {
            false
        }
    }

    /// Evicts the `count` lowest-priority entries among those for which
    /// `eligible` returns true, ordered by `(relevance, last_touched,
    /// insertion_seq)` ascending (see SS4.B eviction tie-break). Returns the
    /// ids removed.
    pub fn evict_lowest<F>(&mut self, count: usize, eligible: F) -> Vec<Uuid>
    where
        F: Fn(&MemoryEntry) -> bool,
    {
        if count == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<(Uuid, f32, chrono::DateTime<chrono::Utc>, u64)> = self
            .entries
            .iter()
            .filter(|e| eligible(e))
            .map(|e| (e.id, e.relevance, e.last_touched, e.insertion_seq))
            .collect();

        candidates.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
                .then(a.3.cmp(&b.3))
        });

        let to_remove: Vec<Uuid> = candidates.into_iter().take(count).map(|c| c.0).collect();
        let remove_set: std::collections::HashSet<Uuid> = to_remove.iter().copied().collect();
        self.retain(|e| !remove_set.contains(&e.id));
        to_remove
    }

    fn rebuild_indices(&mut self) {
        self.by_id = self.entries.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        self.by_path = self
            .entries
            .iter()
            .filter_map(|e| e.path.clone().map(|p| (p, e.id)))
            .collect();
    }
}
