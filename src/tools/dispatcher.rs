//! 工具调度器
//!
//! ToolCall -> ToolResult 的唯一通道：未注册的名字返回 {"error": "Unknown: <name>"}
//! 让模型自我纠正；参数 JSON 解析失败、handler 出错或超时都转成 {"error": ...}，
//! 任何失败都不会越过调度器边界中断 Agentic 循环。同一轮模型响应里的多个调用
//! 并发执行（High Context, Low Loop：宁多并发、少回合）。
//! 每次调用输出结构化审计日志（名称、脱敏参数、结果形状、耗时）。

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::llm::ToolCall;
use crate::tools::registry::ToolRegistry;

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

/// 一次工具调用的结果；payload 要么是 handler 的 JSON，要么是 {"error": ...}
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub payload: Value,
}

impl ToolResult {
    fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            payload: json!({"error": message.into()}),
        }
    }

    pub fn is_error(&self) -> bool {
        self.payload.get("error").is_some()
    }

    /// 作为 observation 回填对话的文本形式
    pub fn content(&self) -> String {
        self.payload.to_string()
    }
}

/// 工具调度器：注册表 + 全局单次调用超时
pub struct ToolDispatcher {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行单个调用；永不返回 Err —— 一切失败都落进 payload 的 {"error": ...}
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let result = self.dispatch_inner(call).await;

        let outcome = if result.is_error() { "error" } else { "ok" };
        let audit = json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": redacted_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    async fn dispatch_inner(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolResult::error(call, format!("Unknown: {}", call.name));
        };

        // 参数到此才解析：失败是单个工具失败，不是传输失败
        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(call, format!("Malformed tool arguments: {e}")),
        };

        match timeout(self.timeout, tool.execute(args)).await {
            Ok(Ok(payload)) => ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                payload,
            },
            Ok(Err(message)) => ToolResult::error(call, message),
            Err(_) => ToolResult::error(
                call,
                format!("Timeout after {}s", self.timeout.as_secs()),
            ),
        }
    }

    /// 同一轮响应里的所有调用并发执行；结果顺序与调用顺序一致
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|c| self.dispatch(c))).await
    }
}

/// 审计用参数预览：疑似机密的键脱敏，整体截断
fn redacted_preview(raw_args: &str) -> String {
    let preview = match serde_json::from_str::<Value>(raw_args) {
        Ok(mut v) => {
            redact(&mut v);
            v.to_string()
        }
        Err(_) => raw_args.to_string(),
    };
    if preview.chars().count() > ARGS_PREVIEW_CHARS {
        let cut: String = preview.chars().take(ARGS_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        preview
    }
}

fn redact(v: &mut Value) {
    if let Value::Object(map) = v {
        for (k, val) in map.iter_mut() {
            let kl = k.to_lowercase();
            if kl.contains("key") || kl.contains("token") || kl.contains("password") {
                *val = Value::String("***".into());
            } else {
                redact(val);
            }
        }
    }
}
