use std::env;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Process-wide debug-verbosity knob. The only global mutable state in the
/// workspace (see SS5/SS9 of the design notes). 0=info, 1=debug, 2=trace.
static VERBOSITY: AtomicU8 = AtomicU8::new(0);

pub fn set_verbosity(level: u8) {
    VERBOSITY.store(level, Ordering::Relaxed);
}

pub fn verbosity() -> u8 {
    VERBOSITY.load(Ordering::Relaxed)
}

/// Initializes the global `tracing` subscriber from the current verbosity
/// level and `RUST_LOG`, if set. Intended to be called once at process
/// entry, before any agent is constructed.
pub fn init_tracing() {
    let default_filter = match verbosity() {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub user_name: String,
    pub workspace_path: String,
    pub thinking_level: String,
    /// Maximum number of short-term messages retained before the head is
    /// dropped (SS4.A `add_message`).
    pub max_short_term_messages: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Aigent".to_string(),
            user_name: String::new(),
            workspace_path: ".".to_string(),
            thinking_level: "balanced".to_string(),
            max_short_term_messages: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub ollama_model: String,
    pub openrouter_model: String,
    pub ollama_local_first: bool,
    /// Base URL for the Ollama API. Overridden at runtime by the
    /// `OLLAMA_BASE_URL` environment variable when set.
    pub ollama_base_url: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// Maximum truncation-continuation rounds (SS4.E step 12).
    pub max_continuation_rounds: u8,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            openrouter_model: "openai/gpt-4o-mini".to_string(),
            ollama_local_first: true,
            ollama_base_url: "http://localhost:11434".to_string(),
            temperature: 0.7,
            top_p: 0.95,
            max_tokens: 4096,
            max_continuation_rounds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub backend: String,
    pub working_aging_rate: f32,
    pub working_relevance_floor: f32,
    pub compression_threshold_messages: usize,
    /// Number of recent user/assistant turns between insight-extraction
    /// passes (SS4.E step 15).
    pub insight_extraction_interval: usize,
    /// Maximum entries the short-term tier holds before the lowest-relevance
    /// one (ties broken by oldest `last_touched`) is evicted.
    pub max_short: usize,
    /// Maximum entries the working tier holds before the same eviction
    /// applies.
    pub max_working: usize,
    /// Maximum entries the long-term tier holds before the same eviction
    /// applies. Decisions are exempt so they survive eviction the same way
    /// they survive compression.
    pub max_long: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: "eventlog".to_string(),
            working_aging_rate: 0.1,
            working_relevance_floor: 0.05,
            compression_threshold_messages: 40,
            insight_extraction_interval: 6,
            max_short: 200,
            max_working: 100,
            max_long: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// No tool requires approval.
    Autonomous,
    /// Only tools flagged `sensitive` require approval.
    Balanced,
    /// Every tool requires approval.
    Safer,
}

impl Default for ApprovalMode {
    fn default() -> Self {
        ApprovalMode::Balanced
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub approval_mode: ApprovalMode,
    pub approval_timeout_secs: u64,
    pub allow_shell: bool,
    pub allow_wasm: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::default(),
            approval_timeout_secs: 120,
            allow_shell: false,
            allow_wasm: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enabled: bool,
    pub max_retries: u8,
    pub role_timeout_secs: u64,
    pub inter_role_sleep_ms: u64,
    pub max_input_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 2,
            role_timeout_secs: 600,
            inter_role_sleep_ms: 1500,
            max_input_chars: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Tick period in seconds. A value <= 0 disables the heartbeat.
    pub period_secs: i64,
    pub task_file_path: String,
    pub deep_reflection_every_n_ticks: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period_secs: 900,
            task_file_path: "TASKS.md".to_string(),
            deep_reflection_every_n_ticks: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub safety: SafetyConfig,
    pub pipeline: PipelineConfig,
    pub heartbeat: HeartbeatConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("OLLAMA_BASE_URL") {
            if !value.is_empty() {
                config.llm.provider = "ollama".to_string();
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn active_model(&self) -> &str {
        if self.llm.provider.eq_ignore_ascii_case("openrouter") {
            &self.llm.openrouter_model
        } else {
            &self.llm.ollama_model
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(config.agent.name, parsed.agent.name);
        assert_eq!(config.safety.approval_mode, parsed.safety.approval_mode);
    }

    #[test]
    fn load_from_missing_path_falls_back_to_default() {
        let config = AppConfig::load_from("/nonexistent/path/aigent.toml").unwrap();
        assert_eq!(config.agent.name, "Aigent");
    }

    #[test]
    fn verbosity_roundtrips() {
        set_verbosity(2);
        assert_eq!(verbosity(), 2);
        set_verbosity(0);
    }
}
