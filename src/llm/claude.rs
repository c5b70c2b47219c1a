//! Claude（Anthropic Messages API）后端适配器
//!
//! system 为顶层字段；工具声明用 input_schema；回复是 content block 列表
//! （text / tool_use 混排）。流式事件按 type 分发：content_block_delta 的
//! text_delta 累计推送，input_json_delta 拼 tool_use 参数。
//! usage：input 来自 message_start；message_delta 的 output_tokens 是
//! 累计运行值，取最新快照而非相加。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::llm::sse::SseStream;
use crate::llm::traits::{
    ChatBackend, ChatMessage, ChatOutcome, ProviderId, StreamSink, TokenUsage, ToolCall, ToolDecl,
};

pub const CLAUDE_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u64 = 4096;

/// Anthropic Messages API 客户端
pub struct ClaudeBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ClaudeBackend {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or(CLAUDE_BASE_URL).trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// user/assistant 双角色；tool_use 在 assistant content、tool_result 在 user content
    fn to_wire_messages(history: &[ChatMessage]) -> Vec<Value> {
        let mut out: Vec<Value> = Vec::with_capacity(history.len());
        for m in history {
            match m {
                ChatMessage::User { text } => {
                    out.push(json!({"role": "user", "content": text}));
                }
                ChatMessage::Assistant { text, tool_calls } => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text}));
                    }
                    for tc in tool_calls {
                        let input: Value =
                            serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": input
                        }));
                    }
                    out.push(json!({"role": "assistant", "content": blocks}));
                }
                ChatMessage::ToolResult { call_id, content, .. } => {
                    // 连续多个 tool_result 归并进同一条 user 消息
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": call_id,
                        "content": content
                    });
                    match out.last_mut() {
                        Some(last)
                            if last["role"] == "user" && last["content"].is_array() =>
                        {
                            last["content"].as_array_mut().unwrap().push(block);
                        }
                        _ => out.push(json!({"role": "user", "content": [block]})),
                    }
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
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters
                })
            })
            .collect()
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, AgentError> {
        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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

    async fn send_once(&self, body: Value) -> Result<ChatOutcome, AgentError> {
        let resp = self.post(&body).await?;
        let v: Value = resp
            .json()
            .await
            .map_err(|e| AgentError::transport(format!("decode response: {e}")))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(blocks) = v["content"].as_array() {
            for b in blocks {
                match b["type"].as_str() {
                    Some("text") => text.push_str(b["text"].as_str().unwrap_or_default()),
                    Some("tool_use") => tool_calls.push(ToolCall {
                        id: b["id"].as_str().unwrap_or_default().to_string(),
                        name: b["name"].as_str().unwrap_or_default().to_string(),
                        arguments: b["input"].to_string(),
                    }),
                    _ => {}
                }
            }
        }
        let usage = TokenUsage::new(
            v["usage"]["input_tokens"].as_u64().unwrap_or(0),
            v["usage"]["output_tokens"].as_u64().unwrap_or(0),
        );
        Ok(ChatOutcome { text, tool_calls, usage })
    }

    /// message_start 给出 input 与初始 output；之后每个 message_delta 携带的
    /// output_tokens 已是累计值，直接覆盖
    fn apply_usage_event(usage: &mut TokenUsage, v: &Value) {
        match v["type"].as_str() {
            Some("message_start") => {
                let u = &v["message"]["usage"];
                usage.input_tokens = u["input_tokens"].as_u64().unwrap_or(0);
                usage.output_tokens = u["output_tokens"].as_u64().unwrap_or(0);
            }
            Some("message_delta") => {
                if let Some(out) = v["usage"]["output_tokens"].as_u64() {
                    usage.output_tokens = out;
                }
            }
            _ => {}
        }
    }

    async fn send_streaming(
        &self,
        body: Value,
        sink: &dyn StreamSink,
    ) -> Result<ChatOutcome, AgentError> {
        let resp = self.post(&body).await?;
        let mut stream = SseStream::new(resp);

        let mut text = String::new();
        let mut usage = TokenUsage::default();
        // block index -> (id, name, input_json 累计)
        let mut partial_calls: Vec<(usize, String, String, String)> = Vec::new();

        while let Some(data) = stream.next_data().await? {
            let v: Value = match serde_json::from_str(&data) {
                Ok(v) => v,
                Err(_) => continue,
            };
            match v["type"].as_str() {
                Some("message_start") => Self::apply_usage_event(&mut usage, &v),
                Some("content_block_start") => {
                    let block = &v["content_block"];
                    if block["type"] == "tool_use" {
                        partial_calls.push((
                            v["index"].as_u64().unwrap_or(0) as usize,
                            block["id"].as_str().unwrap_or_default().to_string(),
                            block["name"].as_str().unwrap_or_default().to_string(),
                            String::new(),
                        ));
                    }
                }
                Some("content_block_delta") => {
                    let delta = &v["delta"];
                    match delta["type"].as_str() {
                        Some("text_delta") => {
                            let piece = delta["text"].as_str().unwrap_or_default();
                            if !piece.is_empty() {
                                text.push_str(piece);
                                sink.update(&text);
                            }
                        }
                        Some("input_json_delta") => {
                            let idx = v["index"].as_u64().unwrap_or(0) as usize;
                            if let Some(slot) =
                                partial_calls.iter_mut().find(|(i, ..)| *i == idx)
                            {
                                slot.3.push_str(delta["partial_json"].as_str().unwrap_or(""));
                            }
                        }
                        _ => {}
                    }
                }
                Some("message_delta") => Self::apply_usage_event(&mut usage, &v),
                Some("error") => {
                    return Err(AgentError::transport(
                        v["error"]["message"].as_str().unwrap_or("stream error").to_string(),
                    ));
                }
                _ => {}
            }
        }

        let tool_calls = partial_calls
            .into_iter()
            .map(|(_, id, name, args)| ToolCall {
                id,
                name,
                arguments: if args.is_empty() { "{}".into() } else { args },
            })
            .collect();

        Ok(ChatOutcome { text, tool_calls, usage })
    }
}

#[async_trait]
impl ChatBackend for ClaudeBackend {
    fn provider(&self) -> ProviderId {
        ProviderId::Claude
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
            "max_tokens": MAX_TOKENS,
            "messages": Self::to_wire_messages(history),
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(Self::to_wire_tools(tools));
        }

        match sink {
            Some(sink) => {
                body["stream"] = json!(true);
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
    fn test_tool_results_merge_into_one_user_message() {
        let history = vec![
            ChatMessage::Assistant {
                text: String::new(),
                tool_calls: vec![
                    ToolCall { id: "a".into(), name: "read_file".into(), arguments: "{}".into() },
                    ToolCall { id: "b".into(), name: "list_dir".into(), arguments: "{}".into() },
                ],
            },
            ChatMessage::ToolResult {
                call_id: "a".into(),
                name: "read_file".into(),
                content: "x".into(),
            },
            ChatMessage::ToolResult {
                call_id: "b".into(),
                name: "list_dir".into(),
                content: "y".into(),
            },
        ];
        let wire = ClaudeBackend::to_wire_messages(&history);
        // assistant(tool_use x2) + user(tool_result x2 合并)
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[1]["content"].as_array().unwrap().len(), 2);
        assert_eq!(wire[1]["content"][1]["tool_use_id"], "b");
    }

    #[test]
    fn test_stream_usage_takes_latest_cumulative_snapshot() {
        let mut usage = TokenUsage::default();
        ClaudeBackend::apply_usage_event(
            &mut usage,
            &json!({"type": "message_start", "message": {"usage": {"input_tokens": 10, "output_tokens": 1}}}),
        );
        ClaudeBackend::apply_usage_event(
            &mut usage,
            &json!({"type": "message_delta", "usage": {"output_tokens": 5}}),
        );
        ClaudeBackend::apply_usage_event(
            &mut usage,
            &json!({"type": "message_delta", "usage": {"output_tokens": 9}}),
        );
        // 不是 1 + 5 + 9
        assert_eq!(usage, TokenUsage::new(10, 9));
    }

    #[test]
    fn test_wire_tools_use_input_schema() {
        let tools = vec![ToolDecl {
            name: "web_search".into(),
            description: "Search the web".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let wire = ClaudeBackend::to_wire_tools(&tools);
        assert!(wire[0].get("input_schema").is_some());
        assert!(wire[0].get("parameters").is_none());
    }
}
