use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ── Tool trait and registry ──────────────────────────────────────────────────

/// Static metadata about a tool, used by the LLM to decide which tool to call
/// and by the executor to validate arguments before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's argument object.
    pub json_schema: serde_json::Value,
    /// When true, the executor's approval gate must clear this tool before
    /// it runs (subject to the configured `ApprovalMode`).
    pub sensitive: bool,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, sensitive: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema: serde_json::json!({ "type": "object" }),
            sensitive,
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.json_schema = schema;
        self
    }
}

/// Arguments passed to a tool invocation. Arrives as an untyped JSON object;
/// validated against `ToolSpec::json_schema` by the executor before the
/// handler ever sees it.
pub type ToolArgs = HashMap<String, serde_json::Value>;

/// The result returned after a tool runs. `output` and `error` are kept
/// distinct so a failure's remediation text never contaminates the success
/// channel the LLM reads on retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into(), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, output: String::new(), error: Some(error.into()) }
    }
}

/// Trait implemented by every tool the registry can dispatch to.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn run(&self, args: &ToolArgs) -> Result<ToolOutput>;
}

/// Central registry for all available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }
}
