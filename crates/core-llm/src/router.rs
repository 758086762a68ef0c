use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatMessage, ChatRole, ToolCall, ToolCallFunction};
use crate::client::{
    ChatChunk, ChatResponse, ChatStream, FinishReason, LlmClient, LlmErrorKind, RateLimits,
    SamplingParams, Usage,
};

/// Which upstream backend a `LlmRouter` is currently configured to hit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenRouter,
}

const OPENROUTER_FALLBACK_MODELS: &[&str] = &[
    "openai/gpt-4o-mini",
    "anthropic/claude-3.5-sonnet",
    "google/gemini-2.0-flash-001",
    "meta-llama/llama-3.1-70b-instruct",
    "deepseek/deepseek-chat",
];

/// Production `LlmClient` implementation. Routes to a local Ollama server or
/// the OpenRouter-hosted model gateway depending on configuration; the core
/// itself stays provider-agnostic (SS6.1) by only ever depending on the
/// `LlmClient` trait.
#[derive(Debug, Clone)]
pub struct LlmRouter {
    client: reqwest::Client,
    provider: Provider,
    ollama_model: String,
    openrouter_model: String,
    ollama_base_url: String,
}

impl LlmRouter {
    pub fn new(
        provider: Provider,
        ollama_model: impl Into<String>,
        openrouter_model: impl Into<String>,
        ollama_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider,
            ollama_model: ollama_model.into(),
            openrouter_model: openrouter_model.into(),
            ollama_base_url: ollama_base_url.into(),
        }
    }

    async fn select_and_chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        tx: Option<mpsc::Sender<String>>,
        cancel: CancellationToken,
    ) -> Result<(String, Vec<ToolCall>, FinishReason, Usage)> {
        let call = async {
            match self.provider {
                Provider::Ollama => self.chat_ollama(messages, tools, tx).await,
                Provider::OpenRouter => self.chat_openrouter(messages, tools, tx).await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("llm call cancelled"),
            result = call => result,
        }
    }

    async fn chat_ollama(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        tx: Option<mpsc::Sender<String>>,
    ) -> Result<(String, Vec<ToolCall>, FinishReason, Usage)> {
        let endpoint = format!("{}/api/chat", self.ollama_base_url.trim_end_matches('/'));
        let ollama_messages = messages_to_ollama(messages);
        let mut payload = json!({
            "model": self.ollama_model,
            "messages": ollama_messages,
            "stream": tx.is_some(),
        });
        if let Some(tools_val) = tools {
            payload["tools"] = tools_val.clone();
        }

        if let Some(tx) = tx {
            let mut response = self.client.post(&endpoint).json(&payload).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body: serde_json::Value = response.json().await.unwrap_or_default();
                return Ok((
                    format!("Ollama error ({status}): {body}"),
                    vec![],
                    FinishReason::Error(LlmErrorKind::Transport),
                    Usage::default(),
                ));
            }
            let mut full = String::new();
            let mut calls = vec![];
            let mut usage = Usage::default();
            while let Some(chunk) = response.chunk().await? {
                for line in String::from_utf8_lossy(&chunk).lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let Ok(json) = serde_json::from_str::<serde_json::Value>(line) else { continue };
                    if let Some(content) =
                        json.get("message").and_then(|m| m.get("content")).and_then(|v| v.as_str())
                    {
                        if !content.is_empty() {
                            full.push_str(content);
                            let _ = tx.send(content.to_string()).await;
                        }
                    }
                    if json.get("done").and_then(|v| v.as_bool()).unwrap_or(false) {
                        if let Some(arr) =
                            json.get("message").and_then(|m| m.get("tool_calls")).and_then(|v| v.as_array())
                        {
                            calls = parse_ollama_tool_calls(arr);
                        }
                        usage.prompt = json.get("prompt_eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                        usage.completion = json.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                        usage.total = usage.prompt + usage.completion;
                    }
                }
            }
            let finish = if !calls.is_empty() { FinishReason::ToolCalls } else { FinishReason::Stop };
            return Ok((full, calls, finish, usage));
        }

        let response = self.client.post(&endpoint).json(&payload).send().await;
        match response {
            Ok(response) => {
                let status = response.status();
                let body: serde_json::Value = response.json().await?;
                if !status.is_success() {
                    return Ok((
                        format!("Ollama error ({status}): {body}"),
                        vec![],
                        FinishReason::Error(LlmErrorKind::Transport),
                        Usage::default(),
                    ));
                }
                let content = body.get("message").and_then(|m| m.get("content")).and_then(|v| v.as_str()).unwrap_or("").to_string();
                let calls = body
                    .get("message")
                    .and_then(|m| m.get("tool_calls"))
                    .and_then(|v| v.as_array())
                    .map(|a| parse_ollama_tool_calls(a))
                    .unwrap_or_default();
                let finish = if !calls.is_empty() { FinishReason::ToolCalls } else { FinishReason::Stop };
                let usage = Usage {
                    prompt: body.get("prompt_eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    completion: body.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    total: 0,
                };
                let usage = Usage { total: usage.prompt + usage.completion, ..usage };
                Ok((content, calls, finish, usage))
            }
            Err(error) => Ok((
                format!("Ollama unavailable at {}: {error}", self.ollama_base_url),
                vec![],
                FinishReason::Error(LlmErrorKind::Transport),
                Usage::default(),
            )),
        }
    }

    async fn chat_openrouter(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        tx: Option<mpsc::Sender<String>>,
    ) -> Result<(String, Vec<ToolCall>, FinishReason, Usage)> {
        let api_key = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Ok((
                "OpenRouter key missing. Set OPENROUTER_API_KEY.".to_string(),
                vec![],
                FinishReason::Error(LlmErrorKind::Transport),
                Usage::default(),
            ));
        }

        let openai_messages = messages_to_openai(messages);
        let mut payload = json!({
            "model": self.openrouter_model,
            "messages": openai_messages,
            "stream": tx.is_some(),
        });
        if let Some(tools_val) = tools {
            payload["tools"] = tools_val.clone();
        }

        let request = self
            .client
            .post("https://openrouter.ai/api/v1/chat/completions")
            .bearer_auth(&api_key)
            .header("HTTP-Referer", "https://aigent.local")
            .header("X-Title", "Aigent")
            .json(&payload);

        if let Some(tx) = tx {
            let mut response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body: serde_json::Value = response.json().await.unwrap_or_default();
                return Ok((classify_openai_error(status.as_u16(), &body), vec![], finish_reason_for_status(status.as_u16()), Usage::default()));
            }

            let mut full = String::new();
            let mut tool_map: HashMap<usize, (String, String, String)> = HashMap::new();
            let mut finish = FinishReason::Stop;
            while let Some(chunk) = response.chunk().await? {
                for line in String::from_utf8_lossy(&chunk).lines() {
                    let line = line.trim();
                    if line.is_empty() || line == "data: [DONE]" {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    let Ok(json) = serde_json::from_str::<serde_json::Value>(data) else { continue };
                    let Some(choice) = json.get("choices").and_then(|c| c.get(0)) else { continue };
                    if let Some(fr) = choice.get("finish_reason").and_then(|v| v.as_str()) {
                        finish = parse_finish_reason(fr);
                    }
                    let Some(delta) = choice.get("delta") else { continue };
                    if let Some(content) = delta.get("content").and_then(|v| v.as_str()) {
                        if !content.is_empty() {
                            full.push_str(content);
                            let _ = tx.send(content.to_string()).await;
                        }
                    }
                    if let Some(tcs) = delta.get("tool_calls").and_then(|v| v.as_array()) {
                        for tc in tcs {
                            let idx = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                            let entry = tool_map.entry(idx).or_default();
                            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                                entry.0 = id.to_string();
                            }
                            if let Some(func) = tc.get("function") {
                                if let Some(name) = func.get("name").and_then(|v| v.as_str()) {
                                    entry.1 = name.to_string();
                                }
                                if let Some(args) = func.get("arguments").and_then(|v| v.as_str()) {
                                    entry.2.push_str(args);
                                }
                            }
                        }
                    }
                }
            }
            let mut calls = vec![];
            if !tool_map.is_empty() {
                let mut idxs: Vec<usize> = tool_map.keys().copied().collect();
                idxs.sort();
                for idx in idxs {
                    let (id, name, args) = &tool_map[&idx];
                    calls.push(ToolCall {
                        id: if id.is_empty() { format!("call_{idx}") } else { id.clone() },
                        r#type: "function".to_string(),
                        function: ToolCallFunction { name: name.clone(), arguments: serde_json::from_str(args).unwrap_or(json!({})) },
                    });
                }
                finish = FinishReason::ToolCalls;
            }
            return Ok((full, calls, finish, Usage::default()));
        }

        let response = request.send().await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            return Ok((classify_openai_error(status.as_u16(), &body), vec![], finish_reason_for_status(status.as_u16()), Usage::default()));
        }
        parse_openai_chat_response(&body)
    }
}

#[async_trait]
impl LlmClient for LlmRouter {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        _params: SamplingParams,
        stream_cb: Option<mpsc::Sender<String>>,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        let (content, tool_calls, finish_reason, usage) =
            self.select_and_chat(messages, tools, stream_cb, cancel).await?;
        let message = if tool_calls.is_empty() {
            ChatMessage::assistant(content)
        } else {
            ChatMessage::assistant_tool_calls(tool_calls)
        };
        Ok(ChatResponse { message, finish_reason, usage, rate_limits: None })
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: Option<&serde_json::Value>,
        params: SamplingParams,
        cancel: CancellationToken,
    ) -> Result<ChatStream> {
        use futures::StreamExt;
        let (tx, rx) = mpsc::channel::<String>(32);
        let response = self.chat(messages, tools, params, Some(tx), cancel).await?;
        let tokens = tokio_stream::wrappers::ReceiverStream::new(rx).map(ChatChunk::Token);
        let done = futures::stream::once(async move { ChatChunk::Done(Box::new(response)) });
        Ok(Box::pin(tokens.chain(done)))
    }

    async fn chat_simple(
        &self,
        prompt: &str,
        _temperature: Option<f32>,
        _top_p: Option<f32>,
        _max_tokens: Option<u32>,
    ) -> Result<String> {
        let messages = vec![ChatMessage::user(prompt)];
        let response = self
            .chat(&messages, None, SamplingParams::default(), None, CancellationToken::new())
            .await?;
        Ok(response.message.content.unwrap_or_default())
    }
}

fn finish_reason_for_status(status: u16) -> FinishReason {
    if status == 413 || status == 400 {
        FinishReason::Error(LlmErrorKind::ContextLength)
    } else {
        FinishReason::Error(LlmErrorKind::Transport)
    }
}

/// OpenRouter/OpenAI-compatible context-overflow errors surface as a 400
/// with `context_length_exceeded` somewhere in the body; anything else is a
/// plain transport failure (SS4.E step 9 / SS7).
fn classify_openai_error(status: u16, body: &serde_json::Value) -> String {
    let text = body.to_string();
    if status == 400 && (text.contains("context_length_exceeded") || text.contains("maximum context length")) {
        format!("context_length_exceeded: {body}")
    } else {
        format!("OpenRouter error ({status}): {body}")
    }
}

fn parse_finish_reason(raw: &str) -> FinishReason {
    match raw {
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn messages_to_ollama(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            let role = role_str(&m.role);
            let mut msg = json!({ "role": role });
            if let Some(ref content) = m.content {
                msg["content"] = json!(content);
            }
            if !m.tool_calls.is_empty() {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| json!({ "function": { "name": tc.function.name, "arguments": tc.function.arguments } }))
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            if let Some(ref id) = m.tool_call_id {
                msg["tool_call_id"] = json!(id);
            }
            msg
        })
        .collect()
}

fn messages_to_openai(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            let role = role_str(&m.role);
            let mut msg = json!({ "role": role, "content": m.content.clone() });
            if !m.tool_calls.is_empty() {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.function.name, "arguments": tc.function.arguments.to_string() }
                        })
                    })
                    .collect();
                msg["tool_calls"] = json!(calls);
            }
            if let Some(ref id) = m.tool_call_id {
                msg["tool_call_id"] = json!(id);
            }
            msg
        })
        .collect()
}

fn role_str(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

fn parse_ollama_tool_calls(calls: &[serde_json::Value]) -> Vec<ToolCall> {
    calls
        .iter()
        .enumerate()
        .filter_map(|(i, call)| {
            let func = call.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let arguments = func.get("arguments").cloned().unwrap_or(json!({}));
            Some(ToolCall { id: format!("call_{i}"), r#type: "function".to_string(), function: ToolCallFunction { name, arguments } })
        })
        .collect()
}

fn parse_openai_chat_response(body: &serde_json::Value) -> Result<(String, Vec<ToolCall>, FinishReason, Usage)> {
    let choice = body.get("choices").and_then(|c| c.get(0));
    let message = choice.and_then(|c| c.get("message"));
    let content = message.and_then(|m| m.get("content")).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let finish_raw = choice.and_then(|c| c.get("finish_reason")).and_then(|v| v.as_str()).unwrap_or("stop");
    let tool_calls = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, tc)| {
                    let id = tc.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let arguments = func
                        .get("arguments")
                        .map(|v| if let Some(s) = v.as_str() { serde_json::from_str(s).unwrap_or(json!({})) } else { v.clone() })
                        .unwrap_or(json!({}));
                    Some(ToolCall { id: if id.is_empty() { format!("call_{i}") } else { id }, r#type: "function".to_string(), function: ToolCallFunction { name, arguments } })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let finish = if !tool_calls.is_empty() { FinishReason::ToolCalls } else { parse_finish_reason(finish_raw) };
    let usage = body
        .get("usage")
        .map(|u| Usage {
            prompt: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion: u.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            total: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        })
        .unwrap_or_default();
    Ok((content, tool_calls, finish, usage))
}

/// Best-effort listing of locally installed Ollama models, used by the CLI's
/// `/model` switcher. Falls back to a static OpenRouter catalog when the
/// remote listing endpoint is unreachable.
pub async fn list_ollama_models(base_url: &str) -> Result<Vec<String>> {
    let client = reqwest::Client::new();
    let endpoint = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = client.get(&endpoint).send().await;
    let models = match response {
        Ok(response) if response.status().is_success() => {
            let body: serde_json::Value = response.json().await?;
            body.get("models")
                .and_then(|v| v.as_array())
                .map(|items| items.iter().filter_map(|m| m.get("name").and_then(|n| n.as_str())).map(ToString::to_string).collect())
                .unwrap_or_default()
        }
        _ => vec![],
    };
    Ok(models)
}

pub async fn list_openrouter_models() -> Result<Vec<String>> {
    let client = reqwest::Client::new();
    let response = client.get("https://openrouter.ai/api/v1/models").send().await;
    let models = match response {
        Ok(response) if response.status().is_success() => {
            let body: serde_json::Value = response.json().await?;
            let mut items: Vec<String> = body
                .get("data")
                .and_then(|d| d.as_array())
                .map(|items| items.iter().filter_map(|i| i.get("id").and_then(|id| id.as_str())).map(ToString::to_string).collect())
                .unwrap_or_default();
            if items.is_empty() {
                items = OPENROUTER_FALLBACK_MODELS.iter().map(|m| (*m).to_string()).collect();
            }
            items
        }
        _ => OPENROUTER_FALLBACK_MODELS.iter().map(|m| (*m).to_string()).collect(),
    };
    Ok(models)
}
