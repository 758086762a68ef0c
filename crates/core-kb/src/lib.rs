//! The persistent knowledge-base capability the core consumes (SS6):
//! `add_error`/`add_insight`/`add_decision`/`read`, fire-and-forget from the
//! turn engine's and heartbeat's perspective. Concrete semantics (how the
//! entries are later surfaced to a human) are out of scope; this crate only
//! ships a default file-backed implementation so the workspace has something
//! runnable, grounded on `aigent-runtime`'s `vault.rs` KV-summary-file writer
//! (same idea — append structured entries to a durable file — reduced to
//! plain Markdown sections instead of a full Obsidian vault export, since
//! this crate only needs four flat sections).

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

mod health;

pub use health::{FakeHealthChecker, HealthChecker, HealthReport, Status};

/// The four sections the persisted-state layout names for the
/// knowledge base (SS6 "Persisted state layout").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KbSection {
    Errors,
    Patterns,
    Decisions,
    Insights,
}

impl KbSection {
    fn heading(self) -> &'static str {
        match self {
            KbSection::Errors => "## Errors",
            KbSection::Patterns => "## Patterns",
            KbSection::Decisions => "## Decisions",
            KbSection::Insights => "## Insights",
        }
    }
}

/// The knowledge-base capability consumed by the turn engine (SS4.E step
/// 14/15), the heartbeat loop (SS4.F step 5) and the pipeline orchestrator
/// (SS4.G "successful approvals may be persisted as an insight"). Every
/// write is fire-and-forget from the caller's perspective: a failure here
/// must never fail the turn it was recording.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn add_error(&self, text: &str);
    async fn add_insight(&self, text: &str);
    async fn add_decision(&self, text: &str);
    async fn add_pattern(&self, text: &str);
    /// Returns the full rendered contents, for callers that want to inject
    /// a digest of the knowledge base into a prompt.
    async fn read(&self) -> Result<String>;
}

/// Default file-backed `KnowledgeBase`: a single Markdown file with one
/// `##` heading per section, each entry a timestamped bullet appended under
/// its heading. Grounded on `aigent-runtime`'s `vault.rs` (structured
/// entries written to a durable file) but flattened to four sections instead
/// of a full per-entry Obsidian export.
pub struct FileKnowledgeBase {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKnowledgeBase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, section: KbSection, text: &str) {
        if let Err(err) = self.append_inner(section, text).await {
            tracing::warn!(error = %err, path = %self.path.display(), "failed to append to knowledge base");
        }
    }

    async fn append_inner(&self, section: KbSection, text: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            self.write_skeleton().await?;
        }

        let rendered = tokio::fs::read_to_string(&self.path).await.unwrap_or_default();
        let updated = insert_under_heading(&rendered, section.heading(), &bullet_line(text));
        let mut file = tokio::fs::OpenOptions::new().write(true).truncate(true).create(true).open(&self.path).await?;
        file.write_all(updated.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn write_skeleton(&self) -> Result<()> {
        let skeleton = format!(
            "# Knowledge Base\n\n{}\n\n{}\n\n{}\n\n{}\n",
            KbSection::Errors.heading(),
            KbSection::Patterns.heading(),
            KbSection::Decisions.heading(),
            KbSection::Insights.heading(),
        );
        tokio::fs::write(&self.path, skeleton).await?;
        Ok(())
    }
}

fn bullet_line(text: &str) -> String {
    format!("- [{}] {}", Utc::now().to_rfc3339(), text.trim())
}

/// Inserts `line` as the last bullet directly under `heading`, before the
/// next `##` heading (or end of file). Appends the heading itself if it is
/// missing, which should only happen if the file was hand-edited.
fn insert_under_heading(content: &str, heading: &str, line: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let Some(start) = lines.iter().position(|l| *l == heading) else {
        let mut out = content.trim_end().to_string();
        out.push_str(&format!("\n\n{heading}\n{line}\n"));
        return out;
    };

    let end = lines[start + 1..]
        .iter()
        .position(|l| l.starts_with("## "))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    let mut out: Vec<String> = lines[..end].iter().map(|l| l.to_string()).collect();
    out.push(line.to_string());
    out.extend(lines[end..].iter().map(|l| l.to_string()));
    out.join("\n") + "\n"
}

#[async_trait]
impl KnowledgeBase for FileKnowledgeBase {
    async fn add_error(&self, text: &str) {
        self.append(KbSection::Errors, text).await;
    }

    async fn add_insight(&self, text: &str) {
        self.append(KbSection::Insights, text).await;
    }

    async fn add_decision(&self, text: &str) {
        self.append(KbSection::Decisions, text).await;
    }

    async fn add_pattern(&self, text: &str) {
        self.append(KbSection::Patterns, text).await;
    }

    async fn read(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err.into()),
        }
    }
}

/// A deterministic in-memory test double, recording every entry by section
/// without touching disk.
#[derive(Default)]
pub struct FakeKnowledgeBase {
    entries: Mutex<Vec<(&'static str, String)>>,
}

impl FakeKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<(&'static str, String)> {
        self.entries.lock().await.clone()
    }

    pub async fn count(&self, section: &str) -> usize {
        self.entries.lock().await.iter().filter(|(s, _)| *s == section).count()
    }
}

#[async_trait]
impl KnowledgeBase for FakeKnowledgeBase {
    async fn add_error(&self, text: &str) {
        self.entries.lock().await.push(("error", text.to_string()));
    }

    async fn add_insight(&self, text: &str) {
        self.entries.lock().await.push(("insight", text.to_string()));
    }

    async fn add_decision(&self, text: &str) {
        self.entries.lock().await.push(("decision", text.to_string()));
    }

    async fn add_pattern(&self, text: &str) {
        self.entries.lock().await.push(("pattern", text.to_string()));
    }

    async fn read(&self) -> Result<String> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().map(|(s, t)| format!("[{s}] {t}")).collect::<Vec<_>>().join("\n"))
    }
}
