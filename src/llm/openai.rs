//! OpenAI 兼容后端适配器
//!
//! 通过 chat/completions 调用任意 OpenAI 兼容端点（可配置 base_url，兼容 DeepSeek、自建代理等）。
//! 工具调用走 function calling；流式模式按 delta 累计文本并推送累计全文，
//! tool_calls 分片按 index 归并，usage 来自 stream_options.include_usage 的末尾块。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::llm::sse::SseStream;
use crate::llm::traits::{
    ChatBackend, ChatMessage, ChatOutcome, ProviderId, StreamSink, TokenUsage, ToolCall, ToolDecl,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI 兼容客户端
pub struct OpenAiBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn to_wire_messages(&self, history: &[ChatMessage], system: &str) -> Vec<Value> {
        let mut out = Vec::with_capacity(history.len() + 1);
        if !system.is_empty() {
            out.push(json!({"role": "system", "content": system}));
        }
        for m in history {
            match m {
                ChatMessage::User { text } => {
                    out.push(json!({"role": "user", "content": text}));
                }
                ChatMessage::Assistant { text, tool_calls } => {
                    let mut msg = json!({"role": "assistant", "content": text});
                    if !tool_calls.is_empty() {
                        msg["tool_calls"] = tool_calls
                            .iter()
                            .map(|tc| {
                                json!({
                                    "id": tc.id,
                                    "type": "function",
                                    "function": {"name": tc.name, "arguments": tc.arguments}
                                })
                            })
                            .collect();
                    }
                    out.push(msg);
                }
                ChatMessage::ToolResult { call_id, content, .. } => {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": call_id,
                        "content": content
                    }));
                }
            }
        }
        out
    }

    fn to_wire_tools(tools: &[ToolDecl]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect()
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, AgentError> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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

    /// 非流式：一次拿齐 content / tool_calls / usage
    async fn send_once(&self, body: Value) -> Result<ChatOutcome, AgentError> {
        let resp = self.post(&body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::transport(format!("decode response: {e}")))?;

        let message = &v["choices"][0]["message"];
        let text = message["content"].as_str().unwrap_or_default().to_string();
        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|tc| ToolCall {
                        id: tc["id"].as_str().unwrap_or_default().to_string(),
                        name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let usage = TokenUsage::new(
            v["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            v["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        );

        Ok(ChatOutcome { text, tool_calls, usage })
    }

    /// 流式：delta 累计文本推送 sink；tool_calls 分片按 index 归并；usage 取末尾统计块
    async fn send_streaming(
        &self,
        body: Value,
        sink: &dyn StreamSink,
    ) -> Result<ChatOutcome, AgentError> {
        let resp = self.post(&body).await?;
        let mut stream = SseStream::new(resp);

        let mut text = String::new();
        // index -> (id, name, arguments 片段累计)
        let mut partial_calls: Vec<(String, String, String)> = Vec::new();
        let mut usage = TokenUsage::default();

        while let Some(data) = stream.next_data().await? {
            let v: Value = match serde_json::from_str(&data) {
                Ok(v) => v,
                Err(_) => continue, // 容忍保活噪声
            };

            if let Some(u) = v.get("usage").filter(|u| !u.is_null()) {
                usage = TokenUsage::new(
                    u["prompt_tokens"].as_u64().unwrap_or(0),
                    u["completion_tokens"].as_u64().unwrap_or(0),
                );
            }

            let delta = &v["choices"][0]["delta"];
            if let Some(piece) = delta["content"].as_str() {
                if !piece.is_empty() {
                    text.push_str(piece);
                    sink.update(&text);
                }
            }
            if let Some(arr) = delta["tool_calls"].as_array() {
                for tc in arr {
                    let idx = tc["index"].as_u64().unwrap_or(0) as usize;
                    while partial_calls.len() <= idx {
                        partial_calls.push((String::new(), String::new(), String::new()));
                    }
                    let slot = &mut partial_calls[idx];
                    if let Some(id) = tc["id"].as_str() {
                        slot.0 = id.to_string();
                    }
                    if let Some(name) = tc["function"]["name"].as_str() {
                        slot.1.push_str(name);
                    }
                    if let Some(args) = tc["function"]["arguments"].as_str() {
                        slot.2.push_str(args);
                    }
                }
            }
        }

        let tool_calls = partial_calls
            .into_iter()
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(id, name, arguments)| ToolCall {
                id,
                name,
                arguments: if arguments.is_empty() { "{}".into() } else { arguments },
            })
            .collect();

        Ok(ChatOutcome { text, tool_calls, usage })
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenAi
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
            "model": self.model,
            "messages": self.to_wire_messages(history, system),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(Self::to_wire_tools(tools));
        }

        match sink {
            Some(sink) => {
                body["stream"] = json!(true);
                body["stream_options"] = json!({"include_usage": true});
                self.send_streaming(body, sink).await
            }
            None => self.send_once(body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_messages_include_system_and_tool_results() {
        let backend = OpenAiBackend::new(None, "gpt-test", "sk-x");
        let history = vec![
            ChatMessage::user("hi"),
            ChatMessage::Assistant {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: "read_file".into(),
                    arguments: "{\"path\":\"a.md\"}".into(),
                }],
            },
            ChatMessage::ToolResult {
                call_id: "call_1".into(),
                name: "read_file".into(),
                content: "{\"content\":\"x\"}".into(),
            },
        ];
        let wire = backend.to_wire_messages(&history, "persona");
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "read_file");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_wire_tools_shape() {
        let tools = vec![ToolDecl {
            name: "list_dir".into(),
            description: "List a directory".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }];
        let wire = OpenAiBackend::to_wire_tools(&tools);
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "list_dir");
    }
}
