//! LLM client contract consumed by the agent core (SS6), plus a provider
//! router implementation and a deterministic test double.

mod chat;
mod client;
mod fake;
mod json_extract;
mod router;

pub use chat::{ChatMessage, ChatRole, ToolCall, ToolCallFunction};
pub use client::{
    ChatChunk, ChatResponse, ChatStream, FinishReason, LlmClient, LlmErrorKind, RateLimits,
    SamplingParams, Usage,
};
pub use fake::FakeLlmClient;
pub use json_extract::{extract_json_output, StructuredOutput};
pub use router::{list_ollama_models, list_openrouter_models, LlmRouter, Provider};
