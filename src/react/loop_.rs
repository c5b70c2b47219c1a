//! ReAct 循环：模型响应 -> 工具派发 -> observation 回填，直到纯文本或到达上限
//!
//! 每次后端调用都包在重试执行器里；同一轮响应的多个工具调用并发派发，
//! 结果按原顺序各回填一条 ToolResult 消息。到达迭代上限用最后一次文本收尾
//! （记日志，不报错）；用量逐迭代记入账本，由调用方计价。

use crate::core::AgentError;
use crate::llm::{ChatBackend, ChatMessage, RetryPolicy, StreamSink};
use crate::tools::ToolDispatcher;
use crate::usage::TurnLedger;

/// 一轮对话的循环产出
#[derive(Debug)]
pub struct LoopResult {
    pub text: String,
    pub ledger: TurnLedger,
    pub iterations: usize,
}

/// 循环控制器：唯一可变状态是 history，push-only
pub struct AgenticLoop {
    max_steps: usize,
    retry: RetryPolicy,
}

impl AgenticLoop {
    pub fn new(max_steps: usize, retry: RetryPolicy) -> Self {
        Self {
            max_steps: max_steps.max(1),
            retry,
        }
    }

    /// 跑完一轮：history 以当前用户消息结尾，结束时带上全部中间消息
    ///
    /// 返回 Err 仅当后端调用重试耗尽；工具失败都以 observation 回到模型手里。
    pub async fn run_turn(
        &self,
        backend: &dyn ChatBackend,
        dispatcher: &ToolDispatcher,
        history: &mut Vec<ChatMessage>,
        system: &str,
        sink: Option<&dyn StreamSink>,
    ) -> Result<LoopResult, AgentError> {
        let tools = dispatcher.registry().declarations();
        let mut ledger = TurnLedger::new();
        let mut last_text = String::new();

        for step in 1..=self.max_steps {
            // 最后一轮之前都允许流式；中间迭代通常没有文本
            let outcome = self
                .retry
                .run(|| backend.send(history, system, &tools, sink))
                .await?;

            ledger.add(backend.provider(), backend.model(), outcome.usage);
            last_text = outcome.text.clone();
            history.push(ChatMessage::Assistant {
                text: outcome.text,
                tool_calls: outcome.tool_calls.clone(),
            });

            if outcome.tool_calls.is_empty() {
                return Ok(LoopResult {
                    text: last_text,
                    ledger,
                    iterations: step,
                });
            }

            tracing::debug!(
                step,
                calls = outcome.tool_calls.len(),
                "dispatching tool calls"
            );
            let results = dispatcher.dispatch_all(&outcome.tool_calls).await;
            for r in results {
                let content = r.content();
                history.push(ChatMessage::ToolResult {
                    call_id: r.call_id,
                    name: r.name,
                    content,
                });
            }
        }

        tracing::warn!(
            max_steps = self.max_steps,
            "react ceiling reached, finishing with last text"
        );
        Ok(LoopResult {
            text: last_text,
            ledger,
            iterations: self.max_steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatOutcome, ProviderId, ScriptedBackend, TokenUsage, ToolCall};
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct ReadNoteTool;

    #[async_trait]
    impl Tool for ReadNoteTool {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "Read a vault note"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            Ok(json!({"content": "# 투자 트래커\n..."}))
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut reg = ToolRegistry::new();
        reg.register(ReadNoteTool);
        ToolDispatcher::new(reg, 30)
    }

    fn tool_call_outcome() -> ChatOutcome {
        ChatOutcome {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "read_file".into(),
                arguments: r#"{"filePath":"tracker.md"}"#.into(),
            }],
            usage: TokenUsage::new(100, 10),
        }
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock")
            .push(tool_call_outcome())
            .push(ChatOutcome {
                text: "Done".into(),
                tool_calls: vec![],
                usage: TokenUsage::new(120, 20),
            });
        let d = dispatcher();
        let mut history = vec![ChatMessage::user("트래커 읽어줘")];

        let result = AgenticLoop::new(5, RetryPolicy::default())
            .run_turn(&backend, &d, &mut history, "system", None)
            .await
            .unwrap();

        assert_eq!(result.text, "Done");
        assert_eq!(result.iterations, 2);
        assert_eq!(result.ledger.totals(), TokenUsage::new(220, 30));
        // user, assistant(tool_calls), tool result, assistant(final)
        assert_eq!(history.len(), 4);
        // observation 携带工具的完整 payload 文本
        assert!(matches!(
            &history[2],
            ChatMessage::ToolResult { call_id, content, .. }
                if call_id == "call_1" && content.contains("투자 트래커")
        ));
    }

    #[tokio::test]
    async fn test_ceiling_stops_at_max_steps() {
        let backend =
            ScriptedBackend::new(ProviderId::Claude, "mock").repeating(tool_call_outcome());
        let d = dispatcher();
        let mut history = vec![ChatMessage::user("계속 파일만 읽어")];

        let result = AgenticLoop::new(3, RetryPolicy::default())
            .run_turn(&backend, &d, &mut history, "system", None)
            .await
            .unwrap();

        assert_eq!(result.iterations, 3);
        assert_eq!(backend.call_count(), 3);
        // 上限是降级不是错误：收尾文本为空也照常返回
        assert_eq!(result.text, "");
        assert_eq!(result.ledger.iterations(), 3);
    }

    #[tokio::test]
    async fn test_plain_answer_is_single_iteration() {
        let backend = ScriptedBackend::new(ProviderId::Gemini, "mock").push(ChatOutcome {
            text: "안녕하세요".into(),
            tool_calls: vec![],
            usage: TokenUsage::new(5, 3),
        });
        let d = dispatcher();
        let mut history = vec![ChatMessage::user("안녕")];

        let result = AgenticLoop::new(5, RetryPolicy::default())
            .run_turn(&backend, &d, &mut history, "system", None)
            .await
            .unwrap();

        assert_eq!(result.iterations, 1);
        assert_eq!(result.text, "안녕하세요");
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_feeds_error_observation_back() {
        let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock")
            .push(ChatOutcome {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: "call_x".into(),
                    name: "teleport".into(),
                    arguments: "{}".into(),
                }],
                usage: TokenUsage::default(),
            })
            .push(ChatOutcome {
                text: "그런 도구는 없어요".into(),
                ..Default::default()
            });
        let d = dispatcher();
        let mut history = vec![ChatMessage::user("순간이동 해줘")];

        let result = AgenticLoop::new(5, RetryPolicy::default())
            .run_turn(&backend, &d, &mut history, "system", None)
            .await
            .unwrap();

        assert_eq!(result.iterations, 2);
        assert!(matches!(
            &history[2],
            ChatMessage::ToolResult { content, .. } if content.contains("Unknown: teleport")
        ));
    }
}
