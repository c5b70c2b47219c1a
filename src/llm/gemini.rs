//! Gemini（generateContent API）后端适配器
//!
//! system 走 system_instruction，工具声明包在 function_declarations 里，
//! functionCall 的 args 是 JSON 对象且不带 id（本地用 uuid 合成，id 只在编排层使用，
//! 回填 functionResponse 时按 name 对应）。流式走 streamGenerateContent?alt=sse；
//! usageMetadata 每块都是累计值，取最后一块即为整次调用的归一化用量。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::llm::sse::SseStream;
use crate::llm::traits::{
    ChatBackend, ChatMessage, ChatOutcome, ProviderId, StreamSink, TokenUsage, ToolCall, ToolDecl,
};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini 客户端
pub struct GeminiBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or(GEMINI_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// user/model 双角色；functionResponse 归在 user 角色的 parts 里
    fn to_wire_contents(history: &[ChatMessage]) -> Vec<Value> {
        let mut out: Vec<Value> = Vec::with_capacity(history.len());
        for m in history {
            match m {
                ChatMessage::User { text } => {
                    out.push(json!({"role": "user", "parts": [{"text": text}]}));
                }
                ChatMessage::Assistant { text, tool_calls } => {
                    let mut parts: Vec<Value> = Vec::new();
                    if !text.is_empty() {
                        parts.push(json!({"text": text}));
                    }
                    for tc in tool_calls {
                        let args: Value =
                            serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({}));
                        parts.push(json!({"functionCall": {"name": tc.name, "args": args}}));
                    }
                    out.push(json!({"role": "model", "parts": parts}));
                }
                ChatMessage::ToolResult { name, content, .. } => {
                    let response: Value = serde_json::from_str(content)
                        .unwrap_or_else(|_| json!({"result": content}));
                    let part = json!({
                        "functionResponse": {"name": name, "response": response}
                    });
                    match out.last_mut() {
                        Some(last)
                            if last["role"] == "user"
                                && last["parts"][0].get("functionResponse").is_some() =>
                        {
                            last["parts"].as_array_mut().unwrap().push(part);
                        }
                        _ => out.push(json!({"role": "user", "parts": [part]})),
                    }
                }
            }
        }
        out
    }

    fn to_wire_tools(tools: &[ToolDecl]) -> Value {
        json!([{
            "function_declarations": tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters
                }))
                .collect::<Vec<_>>()
        }])
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<reqwest::Response, AgentError> {
        let url = format!(
            "{}/models/{}:{}&key={}",
            self.base_url, self.model, endpoint, self.api_key
        );
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::http(status.as_u16(), text));
        }
        Ok(resp)
    }

    /// 从单个 GenerateContentResponse 收集 text 与 functionCall parts
    fn collect_parts(v: &Value, text: &mut String, tool_calls: &mut Vec<ToolCall>) {
        if let Some(parts) = v["candidates"][0]["content"]["parts"].as_array() {
            for p in parts {
                if let Some(t) = p["text"].as_str() {
                    text.push_str(t);
                }
                if let Some(fc) = p.get("functionCall") {
                    tool_calls.push(ToolCall {
                        // Gemini 不下发调用 id，本地合成
                        id: format!("gc_{}", uuid::Uuid::new_v4().simple()),
                        name: fc["name"].as_str().unwrap_or_default().to_string(),
                        arguments: fc.get("args").cloned().unwrap_or_else(|| json!({})).to_string(),
                    });
                }
            }
        }
    }

    fn usage_of(v: &Value) -> Option<TokenUsage> {
        v.get("usageMetadata").map(|u| {
            TokenUsage::new(
                u["promptTokenCount"].as_u64().unwrap_or(0),
                u["candidatesTokenCount"].as_u64().unwrap_or(0),
            )
        })
    }

    async fn send_once(&self, body: Value) -> Result<ChatOutcome, AgentError> {
        let resp = self.post("generateContent?alt=json", &body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::transport(format!("decode response: {e}")))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        Self::collect_parts(&v, &mut text, &mut tool_calls);
        let usage = Self::usage_of(&v).unwrap_or_default();
        Ok(ChatOutcome { text, tool_calls, usage })
    }

    async fn send_streaming(
        &self,
        body: Value,
        sink: &dyn StreamSink,
    ) -> Result<ChatOutcome, AgentError> {
        let resp = self.post("streamGenerateContent?alt=sse", &body).await?;
        let mut stream = SseStream::new(resp);

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = TokenUsage::default();

        while let Some(data) = stream.next_data().await? {
            let v: Value = match serde_json::from_str(&data) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let before = text.len();
            Self::collect_parts(&v, &mut text, &mut tool_calls);
            if text.len() > before {
                sink.update(&text);
            }
            // 累计快照：最后一块即全量
            if let Some(u) = Self::usage_of(&v) {
                usage = u;
            }
        }

        Ok(ChatOutcome { text, tool_calls, usage })
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn provider(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        history: &[ChatMessage],
        system: &str,
        tools: &[ToolDecl],
        sink: Option<&dyn StreamSink>,
    ) -> Result<ChatOutcome, AgentError> {
        let mut body = json!({
            "contents": Self::to_wire_contents(history),
        });
        if !system.is_empty() {
            body["system_instruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            body["tools"] = Self::to_wire_tools(tools);
        }

        match sink {
            Some(sink) => self.send_streaming(body, sink).await,
            None => self.send_once(body).await,
        }
    }
}
