//! The `TurnEngine` (SS4.E steps 4-15). Steps 1-3 — publishing the per-turn
//! cancellation token, the pipeline-delegation check, and taking the turn
//! mutex — belong to `AgentCore` as the single entry point both user input
//! and the heartbeat call through; this module owns everything from "age
//! working memory" onward. Grounded on `aigent-runtime`'s `runtime/chat.rs`
//! (`respond_and_remember_stream`), with the companion-specific beliefs/
//! relational-matrix blocks dropped since nothing in this design calls for
//! them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use core_config::{AgentConfig, LlmConfig, MemoryConfig};
use core_exec::ToolExecutor;
use core_kb::KnowledgeBase;
use core_llm::{ChatMessage, FinishReason, LlmClient, LlmErrorKind, SamplingParams};
use core_memory::MemoryManager;
use core_session::SessionTracker;
use core_tools::ToolRegistry;

use crate::prompt::{build_system_prompt, PromptFragments};
use crate::tool_loop::{run_tool_loop, ToolLoopError};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("the model's context window overflowed twice in one turn")]
    ContextOverflow,
    #[error("tool recursion exceeded its depth cap")]
    DepthExceeded,
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("turn cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub enum TurnOutcome {
    Completed(String),
    Cancelled,
}

/// The handles a turn needs, bundled so `AgentCore` can hand them down
/// without `TurnEngine::run_turn` taking a dozen separate parameters.
/// Shared across a clone family (SS4.I) via `Arc`, except `memory`/
/// `session`, which are owned per-agent.
#[derive(Clone)]
pub struct EngineServices {
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolRegistry>,
    pub executor: Arc<ToolExecutor>,
    pub kb: Arc<dyn KnowledgeBase>,
    pub agent_config: AgentConfig,
    pub llm_config: LlmConfig,
    pub memory_config: MemoryConfig,
}

/// Owns one conversation's turn state: the tiered memory, the rolling
/// session transcript, and the turn counter insight extraction keys off of.
/// Does not own the turn mutex or the cancellation publish slot — those
/// live on `AgentCore`, one level up, since they govern *which* turn is
/// allowed to run, not what a running turn does.
pub struct TurnEngine {
    services: EngineServices,
    memory: Mutex<MemoryManager>,
    session: SessionTracker,
    turn_count: AtomicU64,
    stream_tx: Mutex<Option<mpsc::Sender<String>>>,
    tool_callbacks: Mutex<Option<crate::tool_loop::ToolCallbacks>>,
    /// The system preamble a clone (SS4.I) was built with, injected as the
    /// `rules` prompt fragment. `None` for an ordinary (non-role) agent.
    role_preamble: Option<String>,
}

impl TurnEngine {
    pub fn new(services: EngineServices, mut memory: MemoryManager) -> Self {
        let cap = services.agent_config.max_short_term_messages;
        memory.set_limits(&services.memory_config);
        Self {
            services,
            memory: Mutex::new(memory),
            session: SessionTracker::new(cap),
            turn_count: AtomicU64::new(0),
            stream_tx: Mutex::new(None),
            tool_callbacks: Mutex::new(None),
            role_preamble: None,
        }
    }

    /// Tags this engine with a role-specific system preamble (SS4.I clone
    /// factory / SS4.G pipeline roles). Rendered as the `rules` prompt
    /// fragment on every turn.
    pub fn with_role_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.role_preamble = Some(preamble.into());
        self
    }

    /// Registers (or clears, with `None`) a listener that receives each text
    /// token as the LLM streams its reply.
    pub async fn set_stream_callback(&self, tx: Option<mpsc::Sender<String>>) {
        *self.stream_tx.lock().await = tx;
    }

    /// Registers (or clears, with `None`) the tool-lifecycle observer
    /// exposed at SS6 (`set_tool_callbacks`).
    pub async fn set_tool_callbacks(&self, callbacks: Option<crate::tool_loop::ToolCallbacks>) {
        *self.tool_callbacks.lock().await = callbacks;
    }

    pub fn memory(&self) -> &Mutex<MemoryManager> {
        &self.memory
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    /// The shared, `Arc`-backed services this engine was built from. Used by
    /// `core-agent`'s clone factory (SS4.I) to stand up a sibling engine
    /// that shares the same LLM/tools/executor/kb without re-constructing
    /// them.
    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Runs one full turn (SS4.E steps 4-15) for `user_text`, honoring
    /// `cancel` at every suspension point. A failure inside the turn is
    /// caught and converted to a `TurnError` rather than panicking the
    /// caller's task (SS4.E "Panic isolation").
    #[instrument(skip(self, cancel), fields(agent = %self.services.agent_config.name))]
    pub async fn run_turn(&self, user_text: &str, cancel: CancellationToken) -> Result<TurnOutcome, TurnError> {
        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        {
            let mut memory = self.memory.lock().await;
            memory.age_working(self.services.memory_config.working_aging_rate, self.services.memory_config.working_relevance_floor);
            memory.add_message("user", user_text);
        }
        self.session.add_message(ChatMessage::user(user_text)).await;

        let system_prompt = {
            let memory = self.memory.lock().await;
            let tool_specs = self.services.tools.list_specs();
            let fragments = PromptFragments {
                agent_name: &self.services.agent_config.name,
                rules: self.role_preamble.as_deref().unwrap_or(""),
                project_summary: "",
                long_term_digest: &memory.get_context(),
                tool_specs: &tool_specs,
                user_message: user_text,
            };
            build_system_prompt(&fragments)
        };

        if self.session.needs_context_refresh(&system_prompt, "", "").await {
            self.session.add_message(ChatMessage::system(system_prompt.clone())).await;
            self.session.mark_context_sent(&system_prompt, "", "").await;
        }

        let params = SamplingParams {
            temperature: self.services.llm_config.temperature,
            top_p: self.services.llm_config.top_p,
            max_tokens: self.services.llm_config.max_tokens,
        };

        let tools_json = tools_as_json(&self.services.tools);
        let messages = self.session.messages().await;
        let stream_cb = self.stream_tx.lock().await.clone();

        let mut response = match self.call_llm(&messages, &tools_json, params, stream_cb.clone(), cancel.clone()).await {
            Ok(response) => response,
            Err(err) => return Err(err),
        };

        if let FinishReason::Error(LlmErrorKind::ContextLength) = response.finish_reason {
            warn!("context window overflowed, trimming oldest short-term memory and retrying once");
            {
                let mut memory = self.memory.lock().await;
                memory.trim_oldest(0.3);
            }
            let drop_count = (messages.len() as f32 * 0.3).ceil() as usize;
            self.session.drop_oldest(drop_count).await;

            let retry_messages = self.session.messages().await;
            response = self
                .call_llm(&retry_messages, &tools_json, params, stream_cb.clone(), cancel.clone())
                .await?;
            if let FinishReason::Error(LlmErrorKind::ContextLength) = response.finish_reason {
                return Err(TurnError::ContextOverflow);
            }
        }

        self.session.update_tokens(response.usage.prompt as u64).await;

        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        let (mut final_text, mut finish_reason) = if response.has_tool_calls() {
            let mut memory = self.memory.lock().await;
            let callbacks = self.tool_callbacks.lock().await.clone();
            let after_tools = run_tool_loop(
                response,
                &self.services.llm,
                &self.services.tools,
                &self.services.executor,
                &self.session,
                &mut memory,
                params,
                cancel.clone(),
                callbacks.as_ref(),
            )
            .await
            .map_err(|err| match err {
                ToolLoopError::DepthExceeded(_) => TurnError::DepthExceeded,
                ToolLoopError::Transport(text) => TurnError::Transport(text),
            })?;
            (after_tools.message.content.unwrap_or_default(), after_tools.finish_reason)
        } else {
            (response.message.content.take().unwrap_or_default(), response.finish_reason.clone())
        };

        final_text = self
            .continue_if_truncated(final_text, &mut finish_reason, &tools_json, params, cancel.clone())
            .await?;

        self.session.add_message(ChatMessage::assistant(final_text.clone())).await;
        {
            let mut memory = self.memory.lock().await;
            memory.add_message("assistant", &final_text);
        }

        self.maybe_compress().await;
        self.maybe_extract_insight(cancel.clone()).await;

        Ok(TurnOutcome::Completed(final_text))
    }

    async fn call_llm(
        &self,
        messages: &[ChatMessage],
        tools_json: &serde_json::Value,
        params: SamplingParams,
        stream_cb: Option<mpsc::Sender<String>>,
        cancel: CancellationToken,
    ) -> Result<core_llm::ChatResponse, TurnError> {
        self.services
            .llm
            .chat(messages, Some(tools_json), params, stream_cb, cancel)
            .await
            .map_err(|err| TurnError::Transport(err.to_string()))
    }

    /// SS4.E step 12: up to `max_continuation_rounds` follow-up calls asking
    /// the model to continue verbatim, concatenated, stopping as soon as a
    /// non-length finish reason arrives.
    async fn continue_if_truncated(
        &self,
        mut text: String,
        finish_reason: &mut FinishReason,
        tools_json: &serde_json::Value,
        params: SamplingParams,
        cancel: CancellationToken,
    ) -> Result<String, TurnError> {
        let max_rounds = self.services.llm_config.max_continuation_rounds;
        for _ in 0..max_rounds {
            if *finish_reason != FinishReason::Length {
                break;
            }
            self.session.add_message(ChatMessage::assistant(text.clone())).await;
            self.session.add_message(ChatMessage::user("Continue exactly where you left off.")).await;

            let messages = self.session.messages().await;
            let response = self.call_llm(&messages, tools_json, params, None, cancel.clone()).await?;
            self.session.drop_newest(2).await;

            text.push_str(&response.message.content.unwrap_or_default());
            *finish_reason = response.finish_reason;
        }
        Ok(text)
    }

    async fn maybe_compress(&self) {
        let threshold = self.services.memory_config.compression_threshold_messages;
        let items = {
            let memory = self.memory.lock().await;
            memory.items_to_compress(threshold)
        };
        if items.is_empty() {
            return;
        }

        let joined = items
            .iter()
            .map(|entry| format!("[{}] {}", entry.source, entry.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Summarize the following conversation history into a compact paragraph of durable facts:\n\n{joined}"
        );

        let summary = match self.services.llm.chat_simple(&prompt, Some(0.3), None, Some(400)).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "compression summary call failed, skipping this round");
                return;
            }
        };

        let mut memory = self.memory.lock().await;
        if let Err(err) = memory.compress_with(&items, summary).await {
            warn!(error = %err, "failed to commit compression summary");
            return;
        }
        drop(memory);
        self.session.reset().await;
        info!(compressed = items.len(), "compressed short-term memory and reset session");
    }

    /// SS4.E step 15: every N turns, spawn a detached out-of-band pass that
    /// asks for a single "Decision:"/"Pattern:" one-liner over the last few
    /// messages.
    async fn maybe_extract_insight(&self, cancel: CancellationToken) {
        let n = self.services.memory_config.insight_extraction_interval.max(1) as u64;
        let turn = self.turn_count.fetch_add(1, Ordering::Relaxed) + 1;
        if turn % n != 0 {
            return;
        }

        let llm = Arc::clone(&self.services.llm);
        let kb = Arc::clone(&self.services.kb);
        let recent = self.session.messages().await;
        let tail: Vec<_> = recent.iter().rev().take(6).rev().cloned().collect();

        tokio::spawn(async move {
            if cancel.is_cancelled() {
                return;
            }
            let transcript = tail
                .iter()
                .filter_map(|m| m.content.as_ref().map(|c| format!("{:?}: {c}", m.role)))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "Given this recent exchange, respond with at most one line starting with \
                 \"Decision:\" or \"Pattern:\" if anything durable was learned, or \"None\" \
                 otherwise.\n\n{transcript}"
            );
            let Ok(reply) = llm.chat_simple(&prompt, Some(0.2), None, Some(80)).await else { return };
            let trimmed = reply.trim();
            if trimmed.starts_with("Decision:") {
                kb.add_decision(trimmed).await;
            } else if trimmed.starts_with("Pattern:") {
                kb.add_pattern(trimmed).await;
            } else {
                debug!("insight extraction pass found nothing durable this round");
            }
        });
    }
}

fn tools_as_json(tools: &Arc<ToolRegistry>) -> serde_json::Value {
    serde_json::Value::Array(
        tools
            .list_specs()
            .into_iter()
            .map(|spec| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.json_schema,
                    }
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use core_config::ApprovalMode;
    use core_exec::ApprovalGate;
    use core_kb::FakeKnowledgeBase;
    use core_llm::{ChatResponse, ChatRole, FakeLlmClient, Usage};

    use super::*;

    fn services(llm: Arc<dyn LlmClient>) -> EngineServices {
        let gate = Arc::new(ApprovalGate::new(ApprovalMode::Autonomous, vec![], Duration::from_secs(1)));
        EngineServices {
            llm,
            tools: Arc::new(ToolRegistry::default()),
            executor: Arc::new(ToolExecutor::new(gate, Default::default())),
            kb: Arc::new(FakeKnowledgeBase::new()),
            agent_config: AgentConfig::default(),
            llm_config: LlmConfig::default(),
            memory_config: MemoryConfig::default(),
        }
    }

    #[tokio::test]
    async fn a_plain_reply_round_trips_as_the_turn_outcome() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::single("hello there"));
        let engine = TurnEngine::new(services(llm), MemoryManager::default());

        let outcome = engine.run_turn("hi", CancellationToken::new()).await.unwrap();
        match outcome {
            TurnOutcome::Completed(text) => assert_eq!(text, "hello there"),
            TurnOutcome::Cancelled => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits_before_any_llm_call() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::single("unused"));
        let engine = TurnEngine::new(services(Arc::clone(&llm)), MemoryManager::default());

        let token = CancellationToken::new();
        token.cancel();
        let outcome = engine.run_turn("hi", token).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Cancelled));
    }

    #[tokio::test]
    async fn context_length_error_triggers_a_single_trim_and_retry() {
        let first = ChatResponse {
            message: ChatMessage::assistant(""),
            finish_reason: FinishReason::Error(LlmErrorKind::ContextLength),
            usage: Usage::default(),
            rate_limits: None,
        };
        let second = ChatResponse {
            message: ChatMessage::assistant("recovered after trim"),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            rate_limits: None,
        };
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::scripted(vec![first, second]));
        let engine = TurnEngine::new(services(llm), MemoryManager::default());

        let outcome = engine.run_turn("hi", CancellationToken::new()).await.unwrap();
        match outcome {
            TurnOutcome::Completed(text) => assert_eq!(text, "recovered after trim"),
            TurnOutcome::Cancelled => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn two_consecutive_context_length_errors_are_fatal() {
        let failing = ChatResponse {
            message: ChatMessage::assistant(""),
            finish_reason: FinishReason::Error(LlmErrorKind::ContextLength),
            usage: Usage::default(),
            rate_limits: None,
        };
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::scripted(vec![failing.clone(), failing]));
        let engine = TurnEngine::new(services(llm), MemoryManager::default());

        let result = engine.run_turn("hi", CancellationToken::new()).await;
        assert!(matches!(result, Err(TurnError::ContextOverflow)));
    }

    #[tokio::test]
    async fn system_prompt_is_only_sent_once_per_unchanged_context() {
        let fake = Arc::new(FakeLlmClient::scripted(vec![
            ChatResponse { message: ChatMessage::assistant("a"), finish_reason: FinishReason::Stop, usage: Usage::default(), rate_limits: None },
            ChatResponse { message: ChatMessage::assistant("b"), finish_reason: FinishReason::Stop, usage: Usage::default(), rate_limits: None },
        ]));
        let llm: Arc<dyn LlmClient> = fake.clone();
        let engine = TurnEngine::new(services(llm), MemoryManager::default());

        engine.run_turn("first", CancellationToken::new()).await.unwrap();
        engine.run_turn("second", CancellationToken::new()).await.unwrap();

        let calls = fake.recorded_calls().await;
        let system_messages_in_call = |call: &[ChatMessage]| {
            call.iter().filter(|m| m.role == core_llm::ChatRole::System).count()
        };
        assert_eq!(system_messages_in_call(&calls[0]), 1);
        assert_eq!(system_messages_in_call(&calls[1]), 0);
    }

    #[tokio::test]
    async fn truncated_response_triggers_a_continuation_round() {
        let fake = Arc::new(FakeLlmClient::scripted(vec![
            ChatResponse { message: ChatMessage::assistant("part one, "), finish_reason: FinishReason::Length, usage: Usage::default(), rate_limits: None },
            ChatResponse { message: ChatMessage::assistant("part two."), finish_reason: FinishReason::Stop, usage: Usage::default(), rate_limits: None },
        ]));
        let llm: Arc<dyn LlmClient> = fake;
        let engine = TurnEngine::new(services(llm), MemoryManager::default());

        let outcome = engine.run_turn("tell me a long story", CancellationToken::new()).await.unwrap();
        match outcome {
            TurnOutcome::Completed(text) => assert_eq!(text, "part one, part two."),
            TurnOutcome::Cancelled => panic!("expected completion"),
        }

        // The continuation round's scaffolding (assistant(partial) +
        // user("Continue...")) must be trimmed from the tail, not the head:
        // the system prompt stays in the transcript, and no leftover
        // "Continue..." scaffolding message remains.
        let messages = engine.session().messages().await;
        assert!(
            messages.iter().any(|m| m.role == ChatRole::System),
            "system prompt was dropped from the transcript by the continuation round"
        );
        assert!(!messages.iter().any(|m| m.content.as_deref() == Some("Continue exactly where you left off.")));
    }
}
