//! `aigent-core-cli` (SS6 exposed surface): a thin binary wiring
//! `AgentCore::chat`/`stop_current_request`/`shutdown` to stdin/stdout, plus
//! the config and memory maintenance subcommands `aigent-runtime`'s own CLI
//! offers. Construction wiring only — all control-loop logic lives in
//! `core-engine`/`core-agent`.

mod approval;
mod health;
mod interactive;
mod memory_cmds;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use core_agent::{AgentCore, AgentServices};
use core_config::{set_verbosity, AppConfig};
use core_engine::EngineServices;
use core_exec::{ApprovalGate, ToolExecutor, ToolPolicy};
use core_kb::{FileKnowledgeBase, KnowledgeBase};
use core_llm::{LlmClient, LlmRouter, Provider};
use core_memory::MemoryManager;
use core_tools::ToolRegistry;

use crate::approval::StdinApprovalBridge;
use crate::health::ShellHealthChecker;
use crate::memory_cmds::MemoryCommands;

#[derive(Debug, Parser)]
#[command(name = "aigent", version, about = "A persistent memory-centric AI agent")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "aigent.toml")]
    config: PathBuf,

    /// Repeat for more verbose logging (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Starts an interactive chat session (the default with no subcommand).
    Chat,
    /// Sends a single message and prints the reply, then exits.
    Once { message: String },
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Writes the default configuration to the config path.
    Init,
    /// Prints the active configuration as TOML.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    set_verbosity(cli.verbose);
    core_config::init_tracing();

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Config { command: ConfigCommands::Init } => {
            let config = AppConfig::default();
            config.save_to(&cli.config)?;
            println!("wrote default config to {}", cli.config.display());
            Ok(())
        }
        Commands::Config { command: ConfigCommands::Show } => {
            let config = AppConfig::load_from(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Memory { command } => {
            let config = AppConfig::load_from(&cli.config)?;
            memory_cmds::run(command, &memory_path(&config)).await
        }
        Commands::Once { message } => {
            let agent = Arc::new(build_agent(&cli.config).await?);
            let reply = agent.chat(&message).await?;
            println!("{reply}");
            agent.shutdown().await;
            Ok(())
        }
        Commands::Chat => {
            let config_path = cli.config.clone();
            let agent = Arc::new(build_agent(&cli.config).await?);
            spawn_heartbeat(Arc::clone(&agent), config_path);
            interactive::run_chat_repl(agent).await
        }
    }
}

fn memory_path(config: &AppConfig) -> PathBuf {
    Path::new(&config.agent.workspace_path).join("memory.jsonl")
}

fn knowledge_base_path(config: &AppConfig) -> PathBuf {
    Path::new(&config.agent.workspace_path).join("KNOWLEDGE.md")
}

/// Builds an `AgentCore` from config: wires the LLM provider router, an
/// empty tool registry (concrete tool implementations are out of scope for
/// the core, SS1), an approval gate backed by an interactive stdin prompt,
/// a file-backed knowledge base, and the persisted long-term memory store.
async fn build_agent(config_path: &Path) -> Result<AgentCore> {
    let config = AppConfig::load_from(config_path)?;

    let provider = if config.llm.provider.eq_ignore_ascii_case("openrouter") {
        Provider::OpenRouter
    } else {
        Provider::Ollama
    };
    let ollama_base_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| config.llm.ollama_base_url.clone());
    let llm: Arc<dyn LlmClient> = Arc::new(LlmRouter::new(
        provider,
        config.llm.ollama_model.clone(),
        config.llm.openrouter_model.clone(),
        ollama_base_url,
    ));

    let tools = Arc::new(ToolRegistry::default());

    let bridge: Option<Arc<dyn core_exec::ApprovalBridge>> = match config.safety.approval_mode {
        core_config::ApprovalMode::Autonomous => None,
        _ => Some(Arc::new(StdinApprovalBridge)),
    };
    let mut gate = ApprovalGate::new(
        config.safety.approval_mode,
        vec![],
        Duration::from_secs(config.safety.approval_timeout_secs),
    );
    if let Some(bridge) = bridge {
        gate = gate.with_bridge(bridge);
    }
    let executor = Arc::new(ToolExecutor::new(Arc::new(gate), ToolPolicy::default()));

    let kb: Arc<dyn KnowledgeBase> = Arc::new(FileKnowledgeBase::new(knowledge_base_path(&config)));

    let memory = MemoryManager::with_event_log(memory_path(&config)).await?;

    let engine = EngineServices {
        llm,
        tools,
        executor,
        kb,
        agent_config: config.agent.clone(),
        llm_config: config.llm.clone(),
        memory_config: config.memory.clone(),
    };

    let agent = AgentCore::new(AgentServices { engine, memory, pipeline_config: config.pipeline.clone() });
    Ok(agent)
}

/// Spawns the heartbeat loop (SS4.F) in the background, tied to the agent's
/// own lifetime token so `shutdown()` stops it too.
fn spawn_heartbeat(agent: Arc<AgentCore>, config_path: PathBuf) {
    tokio::spawn(async move {
        let Ok(config) = AppConfig::load_from(&config_path) else { return };
        if config.heartbeat.period_secs <= 0 {
            return;
        }
        let health = Arc::new(ShellHealthChecker::new(config.agent.workspace_path.clone()));
        let kb: Arc<dyn KnowledgeBase> = Arc::new(FileKnowledgeBase::new(knowledge_base_path(&config)));
        let heartbeat = core_heartbeat::HeartbeatLoop::new(config.heartbeat, health, kb, agent.clone());
        heartbeat.run(agent.lifetime_token()).await;
    });
}
