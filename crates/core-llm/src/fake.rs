use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::chat::ChatMessage;
use crate::client::{ChatChunk, ChatResponse, ChatStream, FinishReason, LlmClient, SamplingParams, Usage};

/// A deterministic test double that returns a pre-programmed sequence of
/// responses and records every call it received, so SS8's scenario tests are
/// exact and reproducible without a live model (SS6.1/SS8.1).
pub struct FakeLlmClient {
    responses: Mutex<Vec<ChatResponse>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeLlmClient {
    /// Builds a fake that yields `responses` in order, one per `chat` call.
    /// Panics on a call past the end of the script — a test bug, not a
    /// runtime condition.
    pub fn scripted(responses: Vec<ChatResponse>) -> Self {
        Self { responses: Mutex::new(responses), calls: Mutex::new(Vec::new()) }
    }

    pub fn single(content: impl Into<String>) -> Self {
        Self::scripted(vec![ChatResponse {
            message: ChatMessage::assistant(content.into()),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            rate_limits: None,
        }])
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn recorded_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&serde_json::Value>,
        _params: SamplingParams,
        stream_cb: Option<mpsc::Sender<String>>,
        _cancel: CancellationToken,
    ) -> anyhow::Result<ChatResponse> {
        self.calls.lock().await.push(messages.to_vec());
        let mut queue = self.responses.lock().await;
        if queue.is_empty() {
            anyhow::bail!("FakeLlmClient: no scripted response left for call #{}", self.calls.lock().await.len());
        }
        let response = queue.remove(0);
        if let Some(tx) = stream_cb {
            if let Some(ref content) = response.message.content {
                let _ = tx.send(content.clone()).await;
            }
        }
        Ok(response)
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        params: SamplingParams,
        cancel: CancellationToken,
    ) -> anyhow::Result<ChatStream> {
        let response = self.chat(messages, tools, params, None, cancel).await?;
        let content = response.message.content.clone().unwrap_or_default();
        let stream = futures::stream::iter(vec![ChatChunk::Token(content), ChatChunk::Done(Box::new(response))]);
        Ok(Box::pin(stream))
    }

    async fn chat_simple(
        &self,
        prompt: &str,
        _temperature: Option<f32>,
        _top_p: Option<f32>,
        _max_tokens: Option<u32>,
    ) -> anyhow::Result<String> {
        let response = self
            .chat(&[ChatMessage::user(prompt)], None, SamplingParams::default(), None, CancellationToken::new())
            .await?;
        Ok(response.message.content.unwrap_or_default())
    }
}
