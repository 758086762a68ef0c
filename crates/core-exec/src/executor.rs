use std::sync::Arc;

use core_tools::{ToolArgs, ToolOutput, ToolRegistry};
use tracing::{info, warn};

use crate::error::ToolErrorCategory;
use crate::gate::ApprovalGate;
use crate::validate::validate_args;

/// Tool-name allow/deny lists, independent of the approval gate — these
/// govern whether a tool is eligible to run at all, not whether it needs a
/// human to sign off.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    /// Empty means every registered tool is eligible.
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
}

impl ToolPolicy {
    fn check(&self, tool_name: &str) -> Result<(), String> {
        if self.denylist.iter().any(|t| t == tool_name) {
            return Err(format!("tool '{tool_name}' is blocked by policy"));
        }
        if !self.allowlist.is_empty() && !self.allowlist.iter().any(|t| t == tool_name) {
            return Err(format!("tool '{tool_name}' is not in the allowlist"));
        }
        Ok(())
    }
}

/// Generalizes `aigent-runtime`'s `ToolExecutor::execute` (capability gate ->
/// approval gate -> dispatch) with an explicit schema-validation step before
/// dispatch, and classified failure enrichment after it. Tools stay opaque:
/// the executor only ever sees `(name, description, json_schema, handler)`.
pub struct ToolExecutor {
    gate: Arc<ApprovalGate>,
    policy: ToolPolicy,
}

impl ToolExecutor {
    pub fn new(gate: Arc<ApprovalGate>, policy: ToolPolicy) -> Self {
        Self { gate, policy }
    }

    /// Executes a single named tool call. Every branch — unknown tool,
    /// policy rejection, schema failure, approval denial/timeout, handler
    /// error — resolves to a `ToolOutput` with `success=false` rather than
    /// an `Err`, so a caller (the tool loop, SS4.E) can always append the
    /// result as a transcript message without special-casing failure modes.
    pub async fn execute(&self, registry: &ToolRegistry, tool_name: &str, args: &ToolArgs) -> ToolOutput {
        let Some(tool) = registry.get(tool_name) else {
            return ToolOutput::failed(format!("unknown tool: {tool_name}"));
        };
        let spec = tool.spec();

        if let Err(reason) = self.policy.check(tool_name) {
            warn!(tool = tool_name, reason = %reason, "tool call rejected by policy");
            return ToolOutput::failed(reason);
        }

        if let Err(reason) = validate_args(&spec.json_schema, args) {
            let remediation = ToolErrorCategory::Validation.remediation();
            warn!(tool = tool_name, reason = %reason, "tool call failed schema validation");
            return ToolOutput::failed(format!("{reason}. {remediation}"));
        }

        if self.gate.requires_approval(tool_name, spec.sensitive) {
            let preview = preview_args(args);
            match self.gate.request(tool_name, preview).await {
                crate::approval::ApprovalOutcome::Approved => {}
                crate::approval::ApprovalOutcome::Denied => {
                    info!(tool = tool_name, "tool execution denied by reviewer");
                    return ToolOutput::failed(format!("execution of '{tool_name}' was denied by the reviewer"));
                }
                crate::approval::ApprovalOutcome::TimedOut => {
                    info!(tool = tool_name, "tool approval request timed out");
                    return ToolOutput::failed(format!(
                        "approval request for '{tool_name}' timed out before a reviewer responded"
                    ));
                }
            }
        }

        info!(tool = tool_name, "executing tool");
        match tool.run(args).await {
            Ok(output) => output,
            Err(err) => {
                let category = ToolErrorCategory::classify(&err);
                let error_text = format!("{err}. {}", category.remediation());
                warn!(tool = tool_name, ?category, "tool handler failed");
                ToolOutput::failed(error_text)
            }
        }
    }
}

fn preview_args(args: &ToolArgs) -> String {
    let mut parts: Vec<String> = args
        .iter()
        .map(|(k, v)| format!("{k}={}", v.to_string().chars().take(80).collect::<String>()))
        .collect();
    parts.sort();
    parts.join(", ")
}
