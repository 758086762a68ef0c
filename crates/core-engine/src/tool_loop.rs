//! Depth-bounded tool-call dispatch loop (SS4.E "Tool loop"), lifted from
//! `aigent-runtime`'s `tool_loop.rs` (`run_tool_loop`, `MAX_TOOL_ROUNDS`,
//! `execute_tool_calls` via `futures::future::join_all`) and extended three
//! ways per SS4.E.1: the depth cap is raised from 5 to 50 (with a verbose
//! log past depth 10), calls are partitioned into a concurrent non-sensitive
//! fan-out and a strictly sequential sensitive queue, and every non-sensitive
//! call runs inside its own `tokio::spawn` so a panicking handler can never
//! take down the whole batch.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use core_exec::ToolExecutor;
use core_llm::{ChatMessage, ChatResponse, LlmClient, SamplingParams, ToolCall};
use core_memory::MemoryManager;
use core_session::SessionTracker;
use core_tools::{ToolArgs, ToolOutput, ToolRegistry};

/// Hard cap on nested tool-call rounds (SS4.E: "Hard cap: 50 nested tool
/// rounds").
pub const MAX_TOOL_DEPTH: usize = 50;

/// Past this depth every round logs verbosely (SS4.E: "Beyond 10, log
/// verbosely").
const VERBOSE_LOG_DEPTH: usize = 10;

/// Tool names whose successful output is folded into working memory
/// (SS4.E: "On successful read_file/view_file...").
const FILE_READ_TOOLS: [&str; 2] = ["read_file", "view_file"];

/// The tool-lifecycle observer exposed at SS6 (`set_tool_callbacks`).
/// Each slot is optional and independent; a caller only interested in
/// failures can leave `on_start`/`on_complete` unset.
#[derive(Clone)]
pub struct ToolCallbacks {
    pub on_start: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_complete: Option<Arc<dyn Fn(&str, bool) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&str, &str) + Send + Sync>>,
}

impl ToolCallbacks {
    fn notify_start(&self, name: &str) {
        if let Some(cb) = &self.on_start {
            cb(name);
        }
    }

    fn notify_complete(&self, name: &str, output: &ToolOutput) {
        if let Some(cb) = &self.on_complete {
            cb(name, output.success);
        }
        if !output.success {
            if let Some(cb) = &self.on_error {
                cb(name, output.error.as_deref().unwrap_or(&output.output));
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolLoopError {
    #[error("tool recursion exceeded the depth cap of {0}")]
    DepthExceeded(usize),
    #[error("llm transport error: {0}")]
    Transport(String),
}

/// Runs the tool-call loop starting from `response` (the LLM's first reply
/// to the user's message), recursing until the model stops requesting
/// tools. Mutates `session` (the transcript the next LLM call reads) and
/// `memory` (working-tier file upserts) in place; returns the terminal
/// `ChatResponse`.
pub async fn run_tool_loop(
    mut response: ChatResponse,
    llm: &Arc<dyn LlmClient>,
    tools: &Arc<ToolRegistry>,
    executor: &Arc<ToolExecutor>,
    session: &SessionTracker,
    memory: &mut MemoryManager,
    params: SamplingParams,
    cancel: CancellationToken,
    callbacks: Option<&ToolCallbacks>,
) -> Result<ChatResponse, ToolLoopError> {
    let mut depth = 0usize;

    loop {
        if !response.has_tool_calls() {
            return Ok(response);
        }
        if depth >= MAX_TOOL_DEPTH {
            return Err(ToolLoopError::DepthExceeded(MAX_TOOL_DEPTH));
        }
        if depth >= VERBOSE_LOG_DEPTH {
            warn!(depth, "tool loop exceeded verbose-logging threshold, continuing toward the depth cap");
        }

        let calls = response.message.tool_calls.clone();
        session.add_message(ChatMessage::assistant_tool_calls(calls.clone())).await;

        let results = execute_batch(&calls, tools, executor, memory, callbacks).await;
        for call in &calls {
            let output = results.get(&call.id).cloned().unwrap_or_else(|| {
                ToolOutput::failed(format!("no result recorded for tool call {}", call.id))
            });
            let content = render_tool_message(&output);
            session.add_message(ChatMessage::tool_result(call.id.clone(), content)).await;
        }

        let messages = session.messages().await;
        let tools_json = tools_as_json(tools);
        response = llm
            .chat(&messages, Some(&tools_json), params, None, cancel.clone())
            .await
            .map_err(|err| ToolLoopError::Transport(err.to_string()))?;

        depth += 1;
    }
}

/// Partitions `calls` into non-sensitive (concurrent, panic-isolated) and
/// sensitive (strictly sequential, each gated by the approval flow inside
/// `ToolExecutor::execute`) and runs both, returning every result keyed by
/// tool-call id so the caller can re-emit them in the original order
/// (SS4.E: "Results are appended... in original tool-call order").
async fn execute_batch(
    calls: &[ToolCall],
    tools: &Arc<ToolRegistry>,
    executor: &Arc<ToolExecutor>,
    memory: &mut MemoryManager,
    callbacks: Option<&ToolCallbacks>,
) -> HashMap<String, ToolOutput> {
    let mut non_sensitive = Vec::new();
    let mut sensitive = Vec::new();
    for call in calls {
        match tools.get(&call.function.name) {
            Some(tool) if tool.spec().sensitive => sensitive.push(call.clone()),
            _ => non_sensitive.push(call.clone()),
        }
    }

    let mut results = HashMap::new();

    let handles: Vec<_> = non_sensitive
        .into_iter()
        .map(|call| {
            let tools = Arc::clone(tools);
            let executor = Arc::clone(executor);
            if let Some(cb) = callbacks {
                cb.notify_start(&call.function.name);
            }
            tokio::spawn(async move {
                let args = parse_args(&call);
                let output = executor.execute(&tools, &call.function.name, &args).await;
                (call, output)
            })
        })
        .collect();

    for handle in handles {
        match handle.await {
            Ok((call, output)) => {
                if let Some(cb) = callbacks {
                    cb.notify_complete(&call.function.name, &output);
                }
                record_file_read(memory, &call, &output);
                results.insert(call.id.clone(), output);
            }
            Err(join_err) => {
                warn!(error = %join_err, "tool handler panicked inside its isolated task");
            }
        }
    }

    for call in sensitive {
        if let Some(cb) = callbacks {
            cb.notify_start(&call.function.name);
        }
        let args = parse_args(&call);
        let output = executor.execute(tools, &call.function.name, &args).await;
        if let Some(cb) = callbacks {
            cb.notify_complete(&call.function.name, &output);
        }
        record_file_read(memory, &call, &output);
        results.insert(call.id.clone(), output);
    }

    results
}

fn record_file_read(memory: &mut MemoryManager, call: &ToolCall, output: &ToolOutput) {
    if !output.success || !FILE_READ_TOOLS.contains(&call.function.name.as_str()) {
        return;
    }
    let path = call
        .function
        .arguments
        .get("path")
        .and_then(|v| v.as_str())
        .unwrap_or(&call.function.name)
        .to_string();
    memory.add_file(path, output.output.clone(), 1.0);
}

fn parse_args(call: &ToolCall) -> ToolArgs {
    call.function
        .arguments
        .as_object()
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Concatenates `output` and `error` so the LLM sees full context on retry
/// (SS4.E: "On failure, both output and error are concatenated...").
fn render_tool_message(output: &ToolOutput) -> String {
    match (&output.error, output.success) {
        (Some(error), false) if !output.output.is_empty() => format!("{}\n\nError: {error}", output.output),
        (Some(error), false) => format!("Error: {error}"),
        _ => output.output.clone(),
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
