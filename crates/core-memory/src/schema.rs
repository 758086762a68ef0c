use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three memory tiers named by the design: short-term conversation
/// turns, working-set file context, and long-term durable facts/decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Short,
    Working,
    Long,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub tier: MemoryTier,
    pub content: String,
    pub source: String,
    /// Single relevance/confidence score in `[0.0, 1.0]`; aging and eviction
    /// both operate on this field.
    pub relevance: f32,
    pub created_at: DateTime<Utc>,
    pub last_touched: DateTime<Utc>,
    /// Upsert key for `Working` tier entries (a file path). `None` for
    /// `Short`/`Long` entries.
    pub path: Option<String>,
    pub tags: Vec<String>,
    /// Monotonic insertion counter, used as the final eviction tie-break.
    pub insertion_seq: u64,
}

impl MemoryEntry {
    pub fn new(tier: MemoryTier, content: impl Into<String>, source: impl Into<String>, relevance: f32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tier,
            content: content.into(),
            source: source.into(),
            relevance: relevance.clamp(0.0, 1.0),
            created_at: now,
            last_touched: now,
            path: None,
            tags: Vec::new(),
            insertion_seq: 0,
        }
    }
}

pub fn truncate_str(text: &str, max_chars: usize) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let truncated = chars.into_iter().take(max_chars).collect::<String>();
    format!("{truncated}…")
}
