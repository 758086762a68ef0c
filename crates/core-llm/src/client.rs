use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chat::ChatMessage;

/// Why the LLM stopped generating. `Error` carries enough detail for the
/// turn engine (SS4.E step 9) to decide whether to trim-and-retry or surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error(LlmErrorKind),
}

/// Distinguishes a context-length overflow (retryable by trimming history,
/// SS7) from any other transport-level failure (surfaced to the caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    ContextLength,
    Transport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimits {
    pub remaining_requests: Option<u32>,
    pub remaining_tokens: Option<u32>,
    pub reset_in_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub rate_limits: Option<RateLimits>,
}

impl ChatResponse {
    /// True when the assistant message carries at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        !self.message.tool_calls.is_empty()
    }
}

/// A chunk of a streamed response: either an incremental text token, or the
/// terminal record carrying the full `ChatResponse` (SS9 "Streaming": a lazy
/// finite sequence of text chunks plus a terminal record).
#[derive(Debug, Clone)]
pub enum ChatChunk {
    Token(String),
    Done(Box<ChatResponse>),
}

pub type ChatStream = BoxStream<'static, ChatChunk>;

/// Sampling parameters for a single `chat` call.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

/// The LLM HTTP client capability the core consumes (SS6). One production
/// implementation (`LlmRouter`, wired to Ollama/OpenRouter) and one
/// deterministic test double (`FakeLlmClient`) implement it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Full structured chat call with optional tool definitions. `stream_cb`,
    /// when present, receives each text token as it arrives; the full
    /// response (including any tool calls) is still returned at the end.
    /// Honors `cancel`: the call returns promptly once the token fires.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        params: SamplingParams,
        stream_cb: Option<mpsc::Sender<String>>,
        cancel: CancellationToken,
    ) -> anyhow::Result<ChatResponse>;

    /// A lazy streamed variant of `chat`, for callers that want to consume
    /// chunks as a `Stream` rather than register a callback.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        params: SamplingParams,
        cancel: CancellationToken,
    ) -> anyhow::Result<ChatStream>;

    /// A single bounded text-in/text-out call, used for compression and
    /// insight-extraction passes (SS4.E steps 14-15) that don't need tool
    /// calling or the full transcript.
    async fn chat_simple(
        &self,
        prompt: &str,
        temperature: Option<f32>,
        top_p: Option<f32>,
        max_tokens: Option<u32>,
    ) -> anyhow::Result<String>;
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self { temperature: 0.7, top_p: 0.95, max_tokens: 4096 }
    }
}
