//! The pipeline orchestrator (SS4.G): a linear four-role refinement pass
//! (Planner -> Researcher -> Executor -> Critic) over clones of the calling
//! agent.
//!
//! Grounded on `aigent-runtime`'s `multi_sleep.rs` specialist-panel pattern:
//! four role-specific prompts (there, `SpecialistRole::{Archivist,
//! Psychologist, Strategist, Critic}` built by `specialist_prompt` and run in
//! parallel via `tokio::join!`, reconciled by a synthesis step). The roles
//! here form a pipeline instead — each stage's output feeds the next — so
//! they run strictly sequentially rather than concurrently, and that
//! graceful-degradation instinct (multi-agent sleep falls back to
//! single-agent sleep when a specialist call fails) becomes "if the critic
//! is unparseable, treat the executor's output as approved".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use core_config::PipelineConfig;
use core_kb::KnowledgeBase;
use core_llm::extract_json_output;

const PLANNER_PREAMBLE: &str = "You are the Planner. Produce a numbered plan to satisfy the \
    request. Do not take any action yourself.";
const RESEARCHER_PREAMBLE: &str = "You are the Researcher. Using only read-only tools, gather \
    the context needed to execute the plan below.";
const EXECUTOR_PREAMBLE: &str = "You are the Executor. Carry out the plan using the gathered \
    context, making whatever changes are required.";
const CRITIC_PREAMBLE: &str = "You are the Critic. Review the execution output and respond \
    with a fenced ```json block containing exactly {\"approved\": bool, \"feedback\": string, \
    \"response\": string}. Set approved=true only if the work fully satisfies the original \
    request.";

/// The capability the orchestrator consumes: a turn-running agent that can
/// also produce an independent, role-scoped sibling (SS4.I clone factory).
/// `AgentCore` is the only production implementor.
#[async_trait]
pub trait PipelineAgent: Send + Sync {
    async fn chat(&self, text: &str, cancel: CancellationToken) -> anyhow::Result<String>;

    /// Produces a clone sharing this agent's read-only services but with its
    /// own fresh memory/session and a distinct system preamble. Clones have
    /// their own pipeline hard-disabled (SS4.I), so a role can never
    /// recursively re-enter the orchestrator.
    fn clone_for_role(&self, role_preamble: &str) -> Arc<dyn PipelineAgent>;
}

#[derive(Debug, Deserialize)]
struct CriticVerdict {
    approved: bool,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

/// Per-run retry state (SS3 `PipelineState`).
#[derive(Debug, Default, Clone)]
struct PipelineState {
    attempt: u8,
    last_critic_feedback: Option<String>,
}

/// A role's progress, reported to the SS6 `set_pipeline_status_callback`
/// observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleStatus {
    Thinking,
    Done,
    Failed,
}

pub type PipelineStatusCallback = Arc<dyn Fn(&str, RoleStatus) + Send + Sync>;

pub struct Orchestrator {
    config: PipelineConfig,
    kb: Arc<dyn KnowledgeBase>,
    status_cb: Option<PipelineStatusCallback>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, kb: Arc<dyn KnowledgeBase>) -> Self {
        Self { config, kb, status_cb: None }
    }

    /// Attaches a per-role progress observer (builder style, so existing
    /// callers that never register one pay nothing).
    pub fn with_status_callback(mut self, cb: PipelineStatusCallback) -> Self {
        self.status_cb = Some(cb);
        self
    }

    fn notify(&self, role: &str, status: RoleStatus) {
        if let Some(cb) = &self.status_cb {
            cb(role, status);
        }
    }

    /// Runs the full Planner -> Researcher -> Executor -> Critic pipeline
    /// against clones of `agent`, retrying the planner with the critic's
    /// feedback up to `max_retries` times.
    pub async fn run(&self, agent: &Arc<dyn PipelineAgent>, input: &str, cancel: CancellationToken) -> String {
        let truncated_input = truncate_for_prompt(input, self.config.max_input_chars);

        let planner = agent.clone_for_role(PLANNER_PREAMBLE);
        let researcher = agent.clone_for_role(RESEARCHER_PREAMBLE);
        let executor = agent.clone_for_role(EXECUTOR_PREAMBLE);
        let critic = agent.clone_for_role(CRITIC_PREAMBLE);

        let mut state = PipelineState::default();

        for attempt in 0..=self.config.max_retries {
            state.attempt = attempt;
            if cancel.is_cancelled() {
                return "pipeline cancelled".to_string();
            }

            let plan_prompt = match &state.last_critic_feedback {
                Some(feedback) => format!("{truncated_input}\n\nPrior critic feedback:\n{feedback}"),
                None => truncated_input.clone(),
            };

            let Some(plan) = self.run_role("planner", &planner, &plan_prompt, cancel.clone()).await else {
                return "pipeline role failed or timed out".to_string();
            };
            self.sleep_between_roles(&cancel).await;

            let Some(research) = self.run_role("researcher", &researcher, &plan, cancel.clone()).await else {
                return "pipeline role failed or timed out".to_string();
            };
            self.sleep_between_roles(&cancel).await;

            let Some(execution) = self.run_role("executor", &executor, &research, cancel.clone()).await else {
                return "pipeline role failed or timed out".to_string();
            };
            self.sleep_between_roles(&cancel).await;

            let Some(critique) = self.run_role("critic", &critic, &execution, cancel.clone()).await else {
                return "pipeline role failed or timed out".to_string();
            };

            match extract_json_output::<CriticVerdict>(&critique) {
                Some(verdict) if verdict.approved => {
                    self.kb.add_insight(&format!("pipeline approved on attempt {}", attempt + 1)).await;
                    return verdict.response.unwrap_or(execution);
                }
                Some(verdict) => {
                    state.last_critic_feedback = Some(verdict.feedback.unwrap_or_else(|| "no feedback given".to_string()));
                }
                None => {
                    warn!("pipeline critic reply was not parseable JSON, treating executor output as approved");
                    return execution;
                }
            }
        }

        format!(
            "max retries reached. last feedback: {}",
            state.last_critic_feedback.as_deref().unwrap_or("none")
        )
    }

    async fn run_role(&self, role: &str, agent: &Arc<dyn PipelineAgent>, text: &str, cancel: CancellationToken) -> Option<String> {
        self.notify(role, RoleStatus::Thinking);
        let timeout = Duration::from_secs(self.config.role_timeout_secs);
        match tokio::time::timeout(timeout, agent.chat(text, cancel)).await {
            Ok(Ok(reply)) => {
                self.notify(role, RoleStatus::Done);
                Some(reply)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "pipeline role call failed");
                self.notify(role, RoleStatus::Failed);
                None
            }
            Err(_) => {
                warn!("pipeline role call timed out");
                self.notify(role, RoleStatus::Failed);
                None
            }
        }
    }

    async fn sleep_between_roles(&self, cancel: &CancellationToken) {
        let dur = Duration::from_millis(self.config.inter_role_sleep_ms);
        tokio::select! {
            _ = tokio::time::sleep(dur) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

/// Head+tail truncation with an elision marker, generalized from
/// `aigent-runtime`'s simple head-only `prompt_builder::truncate_for_prompt`.
fn truncate_for_prompt(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let head_len = max_chars * 2 / 3;
    let tail_len = max_chars - head_len;
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - tail_len..].iter().collect();
    let elided = chars.len() - head_len - tail_len;
    format!("{head}\n...[{elided} chars elided]...\n{tail}")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    struct Inner {
        replies: Mutex<VecDeque<String>>,
        calls: Mutex<Vec<String>>,
    }

    /// A deterministic `PipelineAgent` test double. `clone_for_role` shares
    /// the same reply queue and call log across every role clone, so a test
    /// can script a full multi-role run and assert the total call count.
    struct FakePipelineAgent(Arc<Inner>);

    impl FakePipelineAgent {
        fn scripted(replies: Vec<&str>) -> Self {
            Self(Arc::new(Inner {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
                calls: Mutex::new(Vec::new()),
            }))
        }

        fn call_count(&self) -> usize {
            self.0.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PipelineAgent for FakePipelineAgent {
        async fn chat(&self, text: &str, _cancel: CancellationToken) -> anyhow::Result<String> {
            self.0.calls.lock().unwrap().push(text.to_string());
            let mut replies = self.0.replies.lock().unwrap();
            replies.pop_front().ok_or_else(|| anyhow::anyhow!("FakePipelineAgent: no scripted reply left"))
        }

        fn clone_for_role(&self, _role_preamble: &str) -> Arc<dyn PipelineAgent> {
            Arc::new(FakePipelineAgent(Arc::clone(&self.0)))
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig { enabled: true, max_retries: 2, role_timeout_secs: 600, inter_role_sleep_ms: 1, max_input_chars: 8000 }
    }

    #[tokio::test]
    async fn a_single_approved_pass_returns_the_critic_response() {
        let agent: Arc<dyn PipelineAgent> = Arc::new(FakePipelineAgent::scripted(vec![
            "1. do the thing",
            "context gathered",
            "executed",
            "```json\n{\"approved\": true, \"response\": \"done\"}\n```",
        ]));
        let orchestrator = Orchestrator::new(config(), Arc::new(core_kb::FakeKnowledgeBase::new()));

        let output = orchestrator.run(&agent, "do the thing", CancellationToken::new()).await;
        assert_eq!(output, "done");
    }

    #[tokio::test]
    async fn reject_then_accept_makes_exactly_eight_role_invocations() {
        let fake = Arc::new(FakePipelineAgent::scripted(vec![
            "plan v1",
            "research v1",
            "executed v1",
            "```json\n{\"approved\": false, \"feedback\": \"missing X\"}\n```",
            "plan v2",
            "research v2",
            "executed v2",
            "```json\n{\"approved\": true, \"response\": \"done\"}\n```",
        ]));
        let agent: Arc<dyn PipelineAgent> = fake.clone();
        let orchestrator = Orchestrator::new(config(), Arc::new(core_kb::FakeKnowledgeBase::new()));

        let output = orchestrator.run(&agent, "do the thing", CancellationToken::new()).await;

        assert_eq!(output, "done");
        // Every role clone shares the same underlying call log (2 attempts *
        // 4 roles), confirming the pipeline is fully sequential: nothing
        // short-circuits or double-invokes a role.
        assert_eq!(fake.call_count(), 8);
    }

    #[tokio::test]
    async fn retries_exhausted_returns_the_banner_with_last_feedback() {
        let fake = FakePipelineAgent::scripted(vec![
            "plan v1", "research v1", "executed v1",
            "```json\n{\"approved\": false, \"feedback\": \"nope 1\"}\n```",
            "plan v2", "research v2", "executed v2",
            "```json\n{\"approved\": false, \"feedback\": \"nope 2\"}\n```",
            "plan v3", "research v3", "executed v3",
            "```json\n{\"approved\": false, \"feedback\": \"nope 3\"}\n```",
        ]);
        let agent: Arc<dyn PipelineAgent> = Arc::new(fake);
        let orchestrator = Orchestrator::new(config(), Arc::new(core_kb::FakeKnowledgeBase::new()));

        let output = orchestrator.run(&agent, "do the thing", CancellationToken::new()).await;
        assert!(output.contains("max retries reached"));
        assert!(output.contains("nope 3"));
    }

    #[tokio::test]
    async fn an_unparseable_critic_reply_falls_back_to_the_executor_output() {
        let agent: Arc<dyn PipelineAgent> = Arc::new(FakePipelineAgent::scripted(vec![
            "plan", "research", "the execution result", "not json at all",
        ]));
        let orchestrator = Orchestrator::new(config(), Arc::new(core_kb::FakeKnowledgeBase::new()));

        let output = orchestrator.run(&agent, "do the thing", CancellationToken::new()).await;
        assert_eq!(output, "the execution result");
    }

    #[tokio::test]
    async fn an_already_cancelled_token_short_circuits_before_any_role_runs() {
        let agent: Arc<dyn PipelineAgent> = Arc::new(FakePipelineAgent::scripted(vec![]));
        let orchestrator = Orchestrator::new(config(), Arc::new(core_kb::FakeKnowledgeBase::new()));

        let token = CancellationToken::new();
        token.cancel();
        let output = orchestrator.run(&agent, "do the thing", token).await;
        assert_eq!(output, "pipeline cancelled");
    }

    #[test]
    fn truncate_for_prompt_keeps_head_and_tail_with_elision_marker() {
        let text = "a".repeat(100);
        let truncated = truncate_for_prompt(&text, 20);
        assert!(truncated.contains("chars elided"));
        assert!(truncated.len() < text.len());
    }

    #[test]
    fn truncate_for_prompt_is_a_noop_under_the_limit() {
        let text = "short text";
        assert_eq!(truncate_for_prompt(text, 100), text);
    }
}
