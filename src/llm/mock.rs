//! Scripted Mock 后端（测试用，无需 API）
//!
//! 预先排队若干 ChatOutcome，send 时依次弹出；队列空时可配置固定回放，
//! 用于"每轮都要求工具调用"的循环上限测试。文本结果分片推送 sink 以模拟流式累计语义。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::traits::{
    ChatBackend, ChatMessage, ChatOutcome, ProviderId, StreamSink, ToolDecl,
};

/// 按脚本回放的 Mock 后端
pub struct ScriptedBackend {
    provider: ProviderId,
    model: String,
    script: Mutex<VecDeque<ChatOutcome>>,
    /// 脚本耗尽后的固定回放；None 时返回空文本结果
    repeat_when_empty: Option<ChatOutcome>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(provider: ProviderId, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
            script: Mutex::new(VecDeque::new()),
            repeat_when_empty: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// 追加一条脚本结果
    pub fn push(self, outcome: ChatOutcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    /// 脚本耗尽后固定返回 outcome（如永远要求工具调用）
    pub fn repeating(mut self, outcome: ChatOutcome) -> Self {
        self.repeat_when_empty = Some(outcome);
        self
    }

    /// send 被调用的次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        _history: &[ChatMessage],
        _system: &str,
        _tools: &[ToolDecl],
        sink: Option<&dyn StreamSink>,
    ) -> Result<ChatOutcome, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat_when_empty.clone())
            .unwrap_or_default();

        if let Some(sink) = sink {
            if !outcome.text.is_empty() {
                // 两段累计推送，模拟流式
                let chars: Vec<char> = outcome.text.chars().collect();
                let mid = chars.len() / 2;
                if mid > 0 {
                    sink.update(&chars[..mid].iter().collect::<String>());
                }
                sink.update(&outcome.text);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::traits::TokenUsage;

    #[tokio::test]
    async fn test_script_then_repeat() {
        let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock")
            .push(ChatOutcome {
                text: "first".into(),
                tool_calls: vec![],
                usage: TokenUsage::new(1, 2),
            })
            .repeating(ChatOutcome {
                text: "again".into(),
                ..Default::default()
            });

        let a = backend.send(&[], "", &[], None).await.unwrap();
        assert_eq!(a.text, "first");
        let b = backend.send(&[], "", &[], None).await.unwrap();
        assert_eq!(b.text, "again");
        let c = backend.send(&[], "", &[], None).await.unwrap();
        assert_eq!(c.text, "again");
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_sink_receives_cumulative_text() {
        let backend = ScriptedBackend::new(ProviderId::Claude, "mock").push(ChatOutcome {
            text: "abcd".into(),
            ..Default::default()
        });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        backend.send(&[], "", &[], Some(&tx)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "ab");
        assert_eq!(rx.recv().await.unwrap(), "abcd");
    }
}
