//! LLM 层：后端抽象、三家协议适配、重试、注册表与自动路由

pub mod claude;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod router;
pub mod sse;
pub mod traits;

pub use claude::ClaudeBackend;
pub use gemini::GeminiBackend;
pub use mock::ScriptedBackend;
pub use openai::OpenAiBackend;
pub use registry::{build_registry, ProviderRegistry, SwitchOutcome};
pub use retry::RetryPolicy;
pub use router::{AutoRouter, Complexity};
pub use traits::{
    ChatBackend, ChatMessage, ChatOutcome, ProviderId, StreamSink, TokenUsage, ToolCall, ToolDecl,
};
