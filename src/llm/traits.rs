//! 聊天后端抽象
//!
//! 三种协议形状各异的后端（OpenAI 兼容 / Claude / Gemini）统一实现 ChatBackend：
//! send(history, system, tools, sink) -> ChatOutcome { text, tool_calls, usage }。
//! 流式输出通过 StreamSink 推送"累计全文"而非增量，调用方只需整体重绘。

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;

/// 后端标识（计价表与路由均以此为键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Gemini,
    Claude,
    OpenAi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Claude => "claude",
            ProviderId::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(ProviderId::Gemini),
            "claude" | "anthropic" => Ok(ProviderId::Claude),
            "openai" | "gpt" => Ok(ProviderId::OpenAi),
            other => Err(AgentError::Config(format!("Unknown provider: {other}"))),
        }
    }
}

/// 模型请求调用某个工具的意图；arguments 保留原始 JSON 文本，
/// 解析推迟到 Dispatcher（解析失败按单个工具失败处理，见 tools::dispatcher）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// 原始参数 JSON 文本（未解析）
    pub arguments: String,
}

/// 后端中立的工具声明；各适配器负责映射为自家 schema 形状
#[derive(Debug, Clone)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    /// JSON Schema（object）
    pub parameters: Value,
}

/// 对话消息（后端中立）；system 指令不在此列，随每次 send 单独传入
#[derive(Debug, Clone)]
pub enum ChatMessage {
    User { text: String },
    Assistant { text: String, tool_calls: Vec<ToolCall> },
    /// 工具结果 observation：在下一次后端请求前逐 call 回填
    ToolResult { call_id: String, name: String, content: String },
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// 归一化后的 token 用量；多事件上报在适配器内求和
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// 一次后端调用的归一化结果
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// 流式输出接收端：每次收到"累计全文"（非 diff）
///
/// 同步调用、无节流；限速是外部传输层的责任。
pub trait StreamSink: Send + Sync {
    fn update(&self, cumulative_text: &str);
}

impl StreamSink for tokio::sync::mpsc::UnboundedSender<String> {
    fn update(&self, cumulative_text: &str) {
        let _ = self.send(cumulative_text.to_string());
    }
}

/// 聊天后端：history + system + 工具声明 -> 归一化结果；可选流式 sink
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn provider(&self) -> ProviderId;

    fn model(&self) -> &str;

    async fn send(
        &self,
        history: &[ChatMessage],
        system: &str,
        tools: &[ToolDecl],
        sink: Option<&dyn StreamSink>,
    ) -> Result<ChatOutcome, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_roundtrip() {
        for id in [ProviderId::Gemini, ProviderId::Claude, ProviderId::OpenAi] {
            assert_eq!(id.as_str().parse::<ProviderId>().unwrap(), id);
        }
        assert_eq!("anthropic".parse::<ProviderId>().unwrap(), ProviderId::Claude);
        assert!("llama".parse::<ProviderId>().is_err());
    }

    #[test]
    fn test_token_usage_add() {
        let mut u = TokenUsage::new(10, 5);
        u.add(TokenUsage::new(3, 7));
        assert_eq!(u.input_tokens, 13);
        assert_eq!(u.output_tokens, 12);
        assert_eq!(u.total(), 25);
    }
}
