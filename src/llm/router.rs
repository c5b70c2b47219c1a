//! 自动路由（auto 模式）
//!
//! 每轮开始前用便宜后端做一次分类调用，把问题标成 simple / complex，
//! 再映射到目标后端（simple -> 轻量快速，complex -> 高质量）并切换。
//! 分类失败一律 fail-open：保持现任后端，不阻塞本轮。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::registry::ProviderRegistry;
use crate::llm::traits::{ChatBackend, ChatMessage, ProviderId};

/// 固定分类标准；只要求模型输出一个词
const CLASSIFY_PROMPT: &str = "Classify the user query below as exactly one word, \
'simple' or 'complex'.\n\
simple: greetings, short factual lookups, single-file or single-note questions, reminders.\n\
complex: multi-step analysis, cross-document synthesis, investment reasoning, code, long writing.\n\
Reply with only the word.";

/// 查询复杂度标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Complex,
}

/// 自动路由器：分类后端 + 两个目标后端 id
pub struct AutoRouter {
    classifier: Arc<dyn ChatBackend>,
    simple_target: ProviderId,
    complex_target: ProviderId,
}

impl AutoRouter {
    pub fn new(
        classifier: Arc<dyn ChatBackend>,
        simple_target: ProviderId,
        complex_target: ProviderId,
    ) -> Self {
        Self {
            classifier,
            simple_target,
            complex_target,
        }
    }

    /// 一次便宜的分类调用；非法输出按分类失败处理
    pub async fn classify(&self, query: &str) -> Result<Complexity, AgentError> {
        let history = vec![ChatMessage::user(query)];
        let outcome = self
            .classifier
            .send(&history, CLASSIFY_PROMPT, &[], None)
            .await
            .map_err(|e| AgentError::Classification(e.to_string()))?;

        match outcome.text.trim().to_lowercase().as_str() {
            s if s.starts_with("simple") => Ok(Complexity::Simple),
            s if s.starts_with("complex") => Ok(Complexity::Complex),
            other => Err(AgentError::Classification(format!(
                "unexpected label: {other:?}"
            ))),
        }
    }

    /// 分类并切换注册表；任何失败（分类或切换）都保持现状
    pub async fn route(&self, registry: &mut ProviderRegistry, query: &str) -> ProviderId {
        let target = match self.classify(query).await {
            Ok(Complexity::Simple) => self.simple_target,
            Ok(Complexity::Complex) => self.complex_target,
            Err(e) => {
                tracing::warn!(error = %e, "classification failed, keeping active provider");
                return registry.active_id();
            }
        };
        if target != registry.active_id() {
            let out = registry.switch(target);
            if !out.success {
                tracing::warn!(target = %target, message = %out.message, "route switch rejected");
            }
        }
        registry.active_id()
    }
}
