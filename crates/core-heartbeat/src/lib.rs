//! The heartbeat loop (SS4.F): wakes on a fixed period, runs the external
//! health check plus a task-file scan, and — when anything needs attention —
//! drives a turn through the exact same entry point user input uses.
//!
//! Grounded on `aigent-runtime`'s `runtime/server.rs` scheduling loop: a
//! `tokio::time::interval` ticker raced against a shutdown signal inside
//! `tokio::select!`, with a separate low-priority task (there, the nightly
//! multi-agent sleep cycle and the proactive-check task; here, "deep
//! reflection") spawned off its own cadence rather than blocking the main
//! tick. Its `proactive_handle: Option<AbortHandle>` pattern is mirrored by
//! `tokio::spawn`ing deep reflection detached rather than awaiting it
//! inline.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use core_config::HeartbeatConfig;
use core_kb::{HealthChecker, KnowledgeBase};

/// The turn-running capability the heartbeat consumes. `AgentCore` is the
/// only production implementor; there is deliberately no separate
/// "heartbeat turn" code path — calling the exact same entry point a
/// user-driven message would use is what makes "acquiring the same turn
/// mutex as user input" (SS4.F step 4) hold structurally rather than by
/// convention.
#[async_trait]
pub trait HeartbeatAgent: Send + Sync {
    async fn chat(&self, text: &str) -> anyhow::Result<String>;
}

/// Drives periodic health checks and, when warranted, a heartbeat turn.
pub struct HeartbeatLoop {
    config: HeartbeatConfig,
    health: Arc<dyn HealthChecker>,
    kb: Arc<dyn KnowledgeBase>,
    agent: Arc<dyn HeartbeatAgent>,
    was_failing: AtomicBool,
    tick_count: AtomicU32,
}

impl HeartbeatLoop {
    pub fn new(
        config: HeartbeatConfig,
        health: Arc<dyn HealthChecker>,
        kb: Arc<dyn KnowledgeBase>,
        agent: Arc<dyn HeartbeatAgent>,
    ) -> Self {
        Self { config, health, kb, agent, was_failing: AtomicBool::new(false), tick_count: AtomicU32::new(0) }
    }

    /// Runs the heartbeat until `cancel` fires. A non-positive period
    /// disables the heartbeat entirely (SS4.F "disabled if P<=0").
    pub async fn run(&self, cancel: CancellationToken) {
        if self.config.period_secs <= 0 {
            info!("heartbeat disabled (period_secs <= 0)");
            return;
        }

        let period = Duration::from_secs(self.config.period_secs as u64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("heartbeat stopped by shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One heartbeat tick (SS4.F steps 1-6).
    async fn tick(&self) {
        let report = self.health.check().await;
        let pending = self.pending_task_count().await;
        let should_act = pending > 0 || report.build_failing() || report.tests_failing();

        debug!(should_act, pending, summary = %report.summary(), "heartbeat tick");

        if should_act {
            let prompt = heartbeat_prompt(&report.summary(), pending);
            match self.agent.chat(&prompt).await {
                Ok(_) => {
                    let now_failing = report.build_failing() || report.tests_failing();
                    if !now_failing && self.was_failing.swap(false, Ordering::Relaxed) {
                        self.kb.add_insight("build/tests recovered after a previously failing state").await;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "heartbeat turn failed");
                    self.kb.add_error(&format!("heartbeat turn failed: {err}")).await;
                }
            }
        }

        if report.build_failing() || report.tests_failing() {
            self.was_failing.store(true, Ordering::Relaxed);
        }

        let tick = self.tick_count.fetch_add(1, Ordering::Relaxed) + 1;
        let every_n = self.config.deep_reflection_every_n_ticks.max(1);
        if tick % every_n == 0 {
            self.spawn_deep_reflection();
        }
    }

    /// SS4.F step 6: an asynchronous deep-reflection turn that does not
    /// block the next tick, mirroring `aigent-runtime`'s detached
    /// `proactive_handle`-style background task.
    fn spawn_deep_reflection(&self) {
        let agent = Arc::clone(&self.agent);
        let kb = Arc::clone(&self.kb);
        tokio::spawn(async move {
            let prompt = "Summarize recent learnings and current roadmap priorities in a \
                          few sentences. Respond with NO PENDING TASKS if there is nothing \
                          worth summarizing.";
            match agent.chat(prompt).await {
                Ok(reply) if !reply.trim().eq_ignore_ascii_case("no pending tasks") => {
                    kb.add_insight(&format!("deep reflection: {}", reply.trim())).await;
                }
                Ok(_) => debug!("deep reflection found nothing worth recording"),
                Err(err) => warn!(error = %err, "deep reflection turn failed"),
            }
        });
    }

    async fn pending_task_count(&self) -> usize {
        let Ok(content) = tokio::fs::read_to_string(&self.config.task_file_path).await else {
            return 0;
        };
        count_pending_tasks(&content)
    }
}

/// Counts `- [ ]` (not started) and `- [/]` (in progress) task markers.
/// `- [x]` (done) is intentionally excluded.
fn count_pending_tasks(content: &str) -> usize {
    let pattern = Regex::new(r"(?m)^\s*-\s*\[( |/)\]").expect("static regex is valid");
    pattern.find_iter(content).count()
}

fn heartbeat_prompt(health_summary: &str, pending_tasks: usize) -> String {
    format!(
        "Heartbeat check-in.\n\
         Health: {health_summary}\n\
         Pending tasks: {pending_tasks}\n\n\
         If the build or tests are failing, investigate and fix them. If there are \
         pending tasks, make progress on the highest priority one. Respond with \
         \"NO PENDING TASKS\" if there is genuinely nothing to do."
    )
}
