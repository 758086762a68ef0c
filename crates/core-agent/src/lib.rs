//! The `AgentCore` facade (SS4.I clone factory, SS6 exposed surface): the
//! single entry point user input, the heartbeat, and each pipeline role all
//! call through. Grounded on `aigent-runtime`'s `AgentRuntime` struct shape
//! (`crates/runtime/src/runtime.rs`) elevated one layer above `TurnEngine`,
//! and on `DaemonState`'s Arc-shared-service / owned-task-handle split
//! (`crates/runtime/src/server/mod.rs`) for what a clone shares versus owns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use core_cancel::TurnCancellation;
use core_config::PipelineConfig;
use core_engine::{EngineServices, ToolCallbacks, TurnEngine, TurnError, TurnOutcome};
use core_heartbeat::HeartbeatAgent;
use core_kb::KnowledgeBase;
use core_memory::MemoryManager;
use core_pipeline::{Orchestrator, PipelineAgent, RoleStatus};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("turn cancelled")]
    Cancelled,
    #[error(transparent)]
    Turn(#[from] TurnError),
}

pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type PipelineStatusCallback = Arc<dyn Fn(&str, RoleStatus) + Send + Sync>;

/// `AgentCore`'s construction bundle, so callers don't thread a dozen
/// separate Arcs through `new` — mirrors `EngineServices` one layer up.
pub struct AgentServices {
    pub engine: EngineServices,
    pub memory: MemoryManager,
    pub pipeline_config: PipelineConfig,
}

/// The SS6 exposed surface and SS4.I clone factory, in one facade.
///
/// A turn mutex (owned here, not inside `TurnEngine`) ensures a heartbeat
/// tick and a user-driven chat can never run concurrently against the same
/// memory/session; the per-turn cancellation token published by
/// `TurnCancellation::begin_turn` is what `stop_current_request` targets.
pub struct AgentCore {
    engine: TurnEngine,
    cancel: TurnCancellation,
    turn_mutex: Mutex<()>,
    last_activity: Mutex<DateTime<Utc>>,
    kb: Arc<dyn KnowledgeBase>,
    pipeline_config: PipelineConfig,
    pipeline_enabled: AtomicBool,
    status_cb: StdMutex<Option<StatusCallback>>,
    pipeline_status_cb: StdMutex<Option<PipelineStatusCallback>>,
}

impl AgentCore {
    pub fn new(services: AgentServices) -> Self {
        let kb = Arc::clone(&services.engine.kb);
        let pipeline_enabled = services.pipeline_config.enabled;
        Self {
            engine: TurnEngine::new(services.engine, services.memory),
            cancel: TurnCancellation::new(),
            turn_mutex: Mutex::new(()),
            last_activity: Mutex::new(Utc::now()),
            kb,
            pipeline_config: services.pipeline_config,
            pipeline_enabled: AtomicBool::new(pipeline_enabled),
            status_cb: StdMutex::new(None),
            pipeline_status_cb: StdMutex::new(None),
        }
    }

    pub fn memory(&self) -> &tokio::sync::Mutex<MemoryManager> {
        self.engine.memory()
    }

    pub fn session(&self) -> &core_session::SessionTracker {
        self.engine.session()
    }

    pub fn pipeline_enabled(&self) -> bool {
        self.pipeline_enabled.load(Ordering::Relaxed)
    }

    pub fn enable_pipeline(&self, enabled: bool) {
        self.pipeline_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_status_callback(&self, cb: Option<StatusCallback>) {
        *self.status_cb.lock().unwrap() = cb;
    }

    pub fn set_pipeline_status_callback(&self, cb: Option<PipelineStatusCallback>) {
        *self.pipeline_status_cb.lock().unwrap() = cb;
    }

    pub async fn set_stream_callback(&self, tx: Option<tokio::sync::mpsc::Sender<String>>) {
        self.engine.set_stream_callback(tx).await;
    }

    pub async fn set_tool_callbacks(&self, callbacks: Option<ToolCallbacks>) {
        self.engine.set_tool_callbacks(callbacks).await;
    }

    /// The agent-lifetime cancellation token, for a caller (the heartbeat
    /// loop, a CLI shutdown path) that needs to race its own wait against
    /// this agent going away.
    pub fn lifetime_token(&self) -> CancellationToken {
        self.cancel.agent_token()
    }

    /// Cancels whatever turn is currently running (SS6 `stop_current_request`).
    /// A no-op if no turn is in flight.
    pub async fn stop_current_request(&self) {
        self.cancel.stop_current_request().await;
    }

    /// Cancels the agent's entire lifetime and flushes long-term memory to
    /// disk (SS6 `shutdown`). Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.shutdown();
        let memory = self.engine.memory().lock().await;
        if let Err(err) = memory.save().await {
            warn!(error = %err, "failed to flush long-term memory on shutdown");
        }
        info!("agent shutdown complete");
    }

    /// The public entry point: runs one turn for `text` and returns the
    /// assistant's reply. Delegates to the pipeline (SS4.G) when enabled.
    pub async fn chat(&self, text: &str) -> Result<String, ChatError> {
        self.chat_with_external_cancel(text, CancellationToken::new()).await
    }

    /// SS4.E steps 1-3 plus dispatch: publish the turn's cancellation token,
    /// delegate to the pipeline if enabled, otherwise take the turn mutex
    /// and run the engine. `external_cancel` additionally short-circuits the
    /// turn — used when a pipeline role clone's parent orchestrator cancels
    /// mid-flight.
    async fn chat_with_external_cancel(&self, text: &str, external_cancel: CancellationToken) -> Result<String, ChatError> {
        let turn_token = self.cancel.begin_turn().await;
        self.touch_activity().await;

        if self.pipeline_enabled() {
            let result = self.run_pipeline(text, turn_token.clone()).await;
            self.cancel.end_turn().await;
            self.touch_activity().await;
            return Ok(result);
        }

        let _permit = self.turn_mutex.lock().await;
        self.notify_status("thinking");

        let outcome = tokio::select! {
            res = self.engine.run_turn(text, turn_token.clone()) => res,
            _ = external_cancel.cancelled() => {
                self.cancel.stop_current_request().await;
                self.cancel.end_turn().await;
                self.notify_status("idle");
                return Err(ChatError::Cancelled);
            }
        };

        self.cancel.end_turn().await;
        self.touch_activity().await;

        match outcome {
            Ok(TurnOutcome::Completed(reply)) => {
                self.notify_status("idle");
                Ok(reply)
            }
            Ok(TurnOutcome::Cancelled) => {
                self.notify_status("idle");
                Err(ChatError::Cancelled)
            }
            Err(err) => {
                self.notify_status("error");
                Err(ChatError::Turn(err))
            }
        }
    }

    /// SS4.G: runs the four-role pipeline over clones of this agent. The
    /// "factory" agent handed to the orchestrator is itself a throwaway
    /// clone — the orchestrator never calls `.chat()` on it directly, only
    /// `.clone_for_role()`, so nothing about it being fresh matters.
    async fn run_pipeline(&self, text: &str, cancel: CancellationToken) -> String {
        let status_cb = self.pipeline_status_cb.lock().unwrap().clone();
        let mut orchestrator = Orchestrator::new(self.pipeline_config.clone(), Arc::clone(&self.kb));
        if let Some(cb) = status_cb {
            orchestrator = orchestrator.with_status_callback(cb);
        }

        let factory: Arc<dyn PipelineAgent> = Arc::new(self.clone_sibling(None));
        orchestrator.run(&factory, text, cancel).await
    }

    async fn touch_activity(&self) {
        *self.last_activity.lock().await = Utc::now();
    }

    pub async fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock().await
    }

    fn notify_status(&self, status: &str) {
        if let Some(cb) = self.status_cb.lock().unwrap().as_ref() {
            cb(status);
        }
    }

    /// SS4.I: stands up an independent sibling that shares this agent's
    /// read-only services (llm/tools/executor/kb, via `Arc::clone`) but owns
    /// fresh memory and session state, a child cancellation token, and its
    /// pipeline hard-disabled regardless of this agent's setting. `preamble`
    /// becomes the sibling's system-prompt `rules` fragment.
    pub fn clone_sibling(&self, preamble: Option<String>) -> AgentCore {
        let services = self.engine.services().clone();
        let mut engine = TurnEngine::new(services, MemoryManager::default());
        if let Some(p) = &preamble {
            engine = engine.with_role_preamble(p.clone());
        }

        AgentCore {
            engine,
            cancel: self.cancel.child_token(),
            turn_mutex: Mutex::new(()),
            last_activity: Mutex::new(Utc::now()),
            kb: Arc::clone(&self.kb),
            pipeline_config: self.pipeline_config.clone(),
            pipeline_enabled: AtomicBool::new(false),
            status_cb: StdMutex::new(None),
            pipeline_status_cb: StdMutex::new(None),
        }
    }
}

#[async_trait]
impl HeartbeatAgent for AgentCore {
    async fn chat(&self, text: &str) -> anyhow::Result<String> {
        AgentCore::chat(self, text).await.map_err(|err| anyhow::anyhow!(err))
    }
}

#[async_trait]
impl PipelineAgent for AgentCore {
    async fn chat(&self, text: &str, cancel: CancellationToken) -> anyhow::Result<String> {
        self.chat_with_external_cancel(text, cancel).await.map_err(|err| anyhow::anyhow!(err))
    }

    fn clone_for_role(&self, role_preamble: &str) -> Arc<dyn PipelineAgent> {
        Arc::new(self.clone_sibling(Some(role_preamble.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use core_config::{AgentConfig, ApprovalMode, LlmConfig, MemoryConfig};
    use core_exec::{ApprovalGate, ToolExecutor, ToolPolicy};
    use core_kb::FakeKnowledgeBase;
    use core_llm::{FakeLlmClient, LlmClient};
    use core_tools::ToolRegistry;

    use super::*;

    fn test_services(llm: Arc<dyn LlmClient>) -> AgentServices {
        let gate = Arc::new(ApprovalGate::new(ApprovalMode::Autonomous, vec![], Duration::from_secs(1)));
        let engine = EngineServices {
            llm,
            tools: Arc::new(ToolRegistry::default()),
            executor: Arc::new(ToolExecutor::new(gate, ToolPolicy::default())),
            kb: Arc::new(FakeKnowledgeBase::new()),
            agent_config: AgentConfig::default(),
            llm_config: LlmConfig::default(),
            memory_config: MemoryConfig::default(),
        };
        AgentServices { engine, memory: MemoryManager::default(), pipeline_config: PipelineConfig { enabled: false, ..PipelineConfig::default() } }
    }

    #[tokio::test]
    async fn a_plain_chat_round_trips_the_reply() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::single("hi there"));
        let agent = AgentCore::new(test_services(llm));
        let reply = agent.chat("hello").await.unwrap();
        assert_eq!(reply, "hi there");
    }

    #[tokio::test]
    async fn stop_current_request_cancels_an_in_flight_turn() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::single("unused"));
        let agent = Arc::new(AgentCore::new(test_services(llm)));

        agent.stop_current_request().await;
        assert!(!agent.lifetime_token().is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_cancels_the_lifetime_token() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::single("unused"));
        let agent = AgentCore::new(test_services(llm));
        let token = agent.lifetime_token();
        agent.shutdown().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn clone_sibling_shares_llm_but_owns_fresh_memory() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::scripted(vec![
            core_llm::ChatResponse {
                message: core_llm::ChatMessage::assistant("parent reply"),
                finish_reason: core_llm::FinishReason::Stop,
                usage: core_llm::Usage::default(),
                rate_limits: None,
            },
            core_llm::ChatResponse {
                message: core_llm::ChatMessage::assistant("sibling reply"),
                finish_reason: core_llm::FinishReason::Stop,
                usage: core_llm::Usage::default(),
                rate_limits: None,
            },
        ]));
        let agent = AgentCore::new(test_services(llm));
        agent.chat("first").await.unwrap();
        assert_eq!(agent.memory().lock().await.stats().total, 2);

        let sibling = agent.clone_sibling(Some("You are the Tester.".to_string()));
        assert_eq!(sibling.memory().lock().await.stats().total, 0, "sibling starts with fresh memory");

        let reply = sibling.chat("second").await.unwrap();
        assert_eq!(reply, "sibling reply");
        // The parent's own memory and session are untouched by the sibling's turn.
        assert_eq!(agent.memory().lock().await.stats().total, 2);
    }

    #[tokio::test]
    async fn clone_sibling_hard_disables_the_pipeline_regardless_of_parent() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::single("unused"));
        let mut services = test_services(llm);
        services.pipeline_config.enabled = true;
        let agent = AgentCore::new(services);
        agent.enable_pipeline(true);
        assert!(agent.pipeline_enabled());

        let sibling = agent.clone_sibling(None);
        assert!(!sibling.pipeline_enabled());
    }

    #[tokio::test]
    async fn pipeline_enabled_agent_runs_the_full_role_sequence() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::scripted(vec![
            core_llm::ChatResponse { message: core_llm::ChatMessage::assistant("1. plan it"), finish_reason: core_llm::FinishReason::Stop, usage: core_llm::Usage::default(), rate_limits: None },
            core_llm::ChatResponse { message: core_llm::ChatMessage::assistant("researched"), finish_reason: core_llm::FinishReason::Stop, usage: core_llm::Usage::default(), rate_limits: None },
            core_llm::ChatResponse { message: core_llm::ChatMessage::assistant("executed"), finish_reason: core_llm::FinishReason::Stop, usage: core_llm::Usage::default(), rate_limits: None },
            core_llm::ChatResponse {
                message: core_llm::ChatMessage::assistant("```json\n{\"approved\": true, \"response\": \"all done\"}\n```"),
                finish_reason: core_llm::FinishReason::Stop,
                usage: core_llm::Usage::default(),
                rate_limits: None,
            },
        ]));
        let mut services = test_services(llm);
        services.pipeline_config = PipelineConfig { enabled: true, max_retries: 1, role_timeout_secs: 30, inter_role_sleep_ms: 1, max_input_chars: 8000 };
        let agent = AgentCore::new(services);

        let reply = agent.chat("build the feature").await.unwrap();
        assert_eq!(reply, "all done");
    }

    #[tokio::test]
    async fn heartbeat_agent_impl_delegates_to_chat() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::single("heartbeat ack"));
        let agent = AgentCore::new(test_services(llm));
        let reply = HeartbeatAgent::chat(&agent, "heartbeat check-in").await.unwrap();
        assert_eq!(reply, "heartbeat ack");
    }

    #[tokio::test]
    async fn status_callback_observes_thinking_then_idle() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::single("ok"));
        let agent = AgentCore::new(test_services(llm));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        agent.set_status_callback(Some(Arc::new(move |status: &str| {
            seen_clone.lock().unwrap().push(status.to_string());
        })));

        agent.chat("hello").await.unwrap();
        let recorded = seen.lock().unwrap().clone();
        assert_eq!(recorded, vec!["thinking".to_string(), "idle".to_string()]);
    }
}
