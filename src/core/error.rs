//! Agent 错误类型
//!
//! 分类与传播策略：只有重试耗尽后的 Transport 错误会到达顶层调用方；
//! 工具失败转为 observation、分类失败回退现任模型、缺 Key 只禁用单个后端。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误（网络、参数解析、工具、配置、计价等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 网络 / HTTP 错误；status 为 None 表示未拿到 HTTP 状态（连接失败等）
    #[error("Transport error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// 模型产出的工具参数不是合法 JSON；按单个工具失败处理，绝不当作传输失败
    #[error("Malformed tool arguments: {0}")]
    MalformedToolArguments(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// 路由分类调用失败；路由器据此回退到现任后端
    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 计价表缺少 (provider, model) 条目；宁可报错也不静默记零成本
    #[error("No pricing entry for {provider}/{model}")]
    UnknownPricing { provider: String, model: String },

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}

impl AgentError {
    /// 构造无状态码的传输错误（连接 / 超时 / 流中断）
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// 构造带 HTTP 状态码的传输错误
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            status: Some(status),
            message: message.into(),
        }
    }
}
