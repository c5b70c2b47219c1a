//! Agent 编排器：单条用户消息的完整管线
//!
//! 顺序：预检索增强 → （可选）自动路由 → 上下文装配 → Agentic 循环 →
//! 计价注记 → 对话落盘。后端重试耗尽时把错误描述当回复文本返回并落一条
//! 零用量记录，绝不 panic 出边界。工作历史按轮数上限裁剪（整轮裁，
//! 不让 observation 断头）；切话题只清工作历史，持久化记录不动。

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::context::ContextAssembler;
use crate::llm::{
    AutoRouter, ChatMessage, ProviderId, ProviderRegistry, RetryPolicy, StreamSink, SwitchOutcome,
};
use crate::react::AgenticLoop;
use crate::retrieval::RetrievalTrigger;
use crate::store::{ConversationStore, ConversationTurn, TopicStore, TurnRole};
use crate::tools::ToolDispatcher;
use crate::usage::PricingTable;

/// 一轮对话的最终回复
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    /// "tokens + 成本"注记；失败轮或计价缺失时为 None
    pub annotation: Option<String>,
}

/// 编排器：持有全部协作方，per-agent 串行（内部锁保证）
pub struct Agent {
    registry: Mutex<ProviderRegistry>,
    router: Option<AutoRouter>,
    trigger: RetrievalTrigger,
    assembler: ContextAssembler,
    dispatcher: ToolDispatcher,
    looper: AgenticLoop,
    pricing: PricingTable,
    store: Arc<dyn ConversationStore>,
    topics: Arc<dyn TopicStore>,
    history: Mutex<Vec<ChatMessage>>,
    max_history_turns: usize,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &AppConfig,
        registry: ProviderRegistry,
        router: Option<AutoRouter>,
        trigger: RetrievalTrigger,
        assembler: ContextAssembler,
        dispatcher: ToolDispatcher,
        pricing: PricingTable,
        store: Arc<dyn ConversationStore>,
        topics: Arc<dyn TopicStore>,
    ) -> Self {
        let retry = RetryPolicy::new(cfg.retry.max_attempts, &cfg.retry.delay_secs);
        Self {
            registry: Mutex::new(registry),
            router,
            trigger,
            assembler,
            dispatcher,
            looper: AgenticLoop::new(cfg.agent.max_react_steps, retry),
            pricing,
            store,
            topics,
            history: Mutex::new(Vec::new()),
            max_history_turns: cfg.agent.max_history_turns,
        }
    }

    /// 处理一条用户消息；内部失败都折叠成回复文本，不向调用方抛错
    pub async fn process_message(&self, text: &str, sink: Option<&dyn StreamSink>) -> AgentReply {
        let augmented = self.trigger.augment(text).await;

        let backend = {
            let mut registry = self.registry.lock().await;
            if let Some(router) = &self.router {
                router.route(&mut registry, text).await;
            }
            registry.active()
        };
        let Some(backend) = backend else {
            return AgentReply {
                text: "No provider is available. Set at least one API key.".into(),
                annotation: None,
            };
        };

        let system = self.assembler.assemble().await;

        let mut history = self.history.lock().await;
        history.push(ChatMessage::user(augmented));
        clamp_history(&mut history, self.max_history_turns);

        let result = self
            .looper
            .run_turn(backend.as_ref(), &self.dispatcher, &mut history, &system, sink)
            .await;
        drop(history);

        match result {
            Ok(result) => {
                let totals = result.ledger.totals();
                let (annotation, cost) = match self.pricing.annotation(&result.ledger) {
                    Ok(note) => {
                        let cost = self.pricing.cost_display(&result.ledger).unwrap_or(0.0);
                        (Some(note), cost)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "pricing lookup failed, reply unannotated");
                        (None, 0.0)
                    }
                };

                self.persist(
                    ConversationTurn::new(TurnRole::User, text),
                    ConversationTurn::new(TurnRole::Assistant, &result.text).with_usage(
                        totals.input_tokens,
                        totals.output_tokens,
                        cost,
                    ),
                )
                .await;

                AgentReply {
                    text: result.text,
                    annotation,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed after retries");
                let reply = format!("Request failed: {e}");
                self.persist(
                    ConversationTurn::new(TurnRole::User, text),
                    ConversationTurn::new(TurnRole::Assistant, &reply),
                )
                .await;
                AgentReply {
                    text: reply,
                    annotation: None,
                }
            }
        }
    }

    /// 显式切换后端；失败时现任不变，消息可直接回给用户
    pub async fn switch_provider(&self, id: ProviderId) -> SwitchOutcome {
        self.registry.lock().await.switch(id)
    }

    pub async fn active_provider(&self) -> Option<ProviderId> {
        let registry = self.registry.lock().await;
        registry.active().map(|_| registry.active_id())
    }

    pub async fn available_providers(&self) -> Vec<ProviderId> {
        self.registry.lock().await.available()
    }

    /// 切话题：清工作历史并记录活动话题；None 表示退出话题
    pub async fn switch_topic(&self, name: Option<&str>) {
        self.history.lock().await.clear();
        let result = match name {
            Some(name) => self.topics.set_topic(name).await,
            None => self.topics.clear_topic().await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "topic store update failed");
        }
    }

    /// 显式失效 schema 摘要缓存；由知道 vault 被外部改动的调用方触发，
    /// 正常轮次只靠 TTL 过期
    pub async fn invalidate_digest(&self) {
        self.assembler.invalidate_digest().await;
    }

    async fn persist(&self, user: ConversationTurn, assistant: ConversationTurn) {
        for turn in [user, assistant] {
            if let Err(e) = self.store.save_turn(turn).await {
                tracing::warn!(error = %e, "conversation persistence failed");
            }
        }
    }
}

/// 超过轮数上限时从最旧的整轮开始裁剪，保证 observation 不会断头
fn clamp_history(history: &mut Vec<ChatMessage>, max_turns: usize) {
    let user_indices: Vec<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, m)| matches!(m, ChatMessage::User { .. }))
        .map(|(i, _)| i)
        .collect();
    if user_indices.len() > max_turns {
        let cut = user_indices[user_indices.len() - max_turns];
        history.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatBackend, ChatOutcome, ScriptedBackend, TokenUsage, ToolCall};
    use crate::persona::Persona;
    use crate::retrieval::NoopRetrieval;
    use crate::store::InMemoryStore;
    use crate::tools::ToolRegistry;
    use crate::usage::TurnLedger;

    fn agent_with(backend: ScriptedBackend) -> (Agent, Arc<InMemoryStore>) {
        let cfg = AppConfig::default();
        let store = Arc::new(InMemoryStore::new());
        let mut registry = ProviderRegistry::new(backend.provider());
        registry.insert(Arc::new(backend));

        let pricing = PricingTable::default().with_entry(ProviderId::OpenAi, "mock", 1.0, 2.0);
        let agent = Agent::new(
            &cfg,
            registry,
            None,
            RetrievalTrigger::new(&cfg.retrieval, Arc::new(NoopRetrieval)),
            ContextAssembler::new(Persona::default(), &cfg.context, Arc::new(NoopRetrieval)),
            ToolDispatcher::new(ToolRegistry::new(), cfg.tools.tool_timeout_secs),
            pricing,
            store.clone(),
            store.clone(),
        );
        (agent, store)
    }

    #[tokio::test]
    async fn test_plain_turn_persists_and_annotates() {
        let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock").push(ChatOutcome {
            text: "네, 확인했어요".into(),
            tool_calls: vec![],
            usage: TokenUsage::new(1_000_000, 0),
        });
        let (agent, store) = agent_with(backend);

        let reply = agent.process_message("안녕", None).await;
        assert_eq!(reply.text, "네, 확인했어요");
        // $1/M input * 1M * 1350 = ₩1350.00
        assert_eq!(
            reply.annotation.unwrap(),
            "1000000 in / 0 out tokens · ≈ ₩1350.00"
        );

        let turns = store.history(10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert!((turns[1].cost - 1350.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_unknown_pricing_leaves_reply_unannotated() {
        let backend = ScriptedBackend::new(ProviderId::Gemini, "unpriced-model").push(ChatOutcome {
            text: "ok".into(),
            tool_calls: vec![],
            usage: TokenUsage::new(10, 10),
        });
        let (agent, _store) = agent_with(backend);
        let reply = agent.process_message("hi", None).await;
        assert_eq!(reply.text, "ok");
        assert!(reply.annotation.is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_reply_text() {
        // 后端一个都没注册 -> 没有可用 provider
        let cfg = AppConfig::default();
        let store = Arc::new(InMemoryStore::new());
        let agent = Agent::new(
            &cfg,
            ProviderRegistry::new(ProviderId::Gemini),
            None,
            RetrievalTrigger::new(&cfg.retrieval, Arc::new(NoopRetrieval)),
            ContextAssembler::new(Persona::default(), &cfg.context, Arc::new(NoopRetrieval)),
            ToolDispatcher::new(ToolRegistry::new(), 30),
            PricingTable::default(),
            store.clone(),
            store.clone(),
        );
        let reply = agent.process_message("hello", None).await;
        assert!(reply.text.contains("No provider"));
        assert!(reply.annotation.is_none());
    }

    #[tokio::test]
    async fn test_switch_topic_clears_working_history() {
        let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock").repeating(ChatOutcome {
            text: "reply".into(),
            ..Default::default()
        });
        let (agent, store) = agent_with(backend);

        agent.process_message("첫 메시지", None).await;
        assert!(!agent.history.lock().await.is_empty());

        agent.switch_topic(Some("투자일지")).await;
        assert!(agent.history.lock().await.is_empty());
        assert_eq!(store.active_topic().await.unwrap().unwrap(), "투자일지");
        // 持久化记录不受影响
        assert_eq!(store.history(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_schema_digest_refreshes_only_on_explicit_invalidate() {
        use crate::core::AgentError;
        use crate::retrieval::{SchemaSource, VaultSchema};
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingSchema {
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl SchemaSource for CountingSchema {
            async fn schema(&self) -> Result<VaultSchema, AgentError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(VaultSchema::default())
            }
        }

        let cfg = AppConfig::default();
        let store = Arc::new(InMemoryStore::new());
        let schema = Arc::new(CountingSchema {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ProviderRegistry::new(ProviderId::OpenAi);
        registry.insert(Arc::new(
            ScriptedBackend::new(ProviderId::OpenAi, "mock").repeating(ChatOutcome {
                text: "ok".into(),
                ..Default::default()
            }),
        ));
        let agent = Agent::new(
            &cfg,
            registry,
            None,
            RetrievalTrigger::new(&cfg.retrieval, Arc::new(NoopRetrieval)),
            ContextAssembler::new(Persona::default(), &cfg.context, schema.clone()),
            ToolDispatcher::new(ToolRegistry::new(), cfg.tools.tool_timeout_secs),
            PricingTable::default().with_entry(ProviderId::OpenAi, "mock", 1.0, 2.0),
            store.clone(),
            store.clone(),
        );

        // TTL 内多轮共用同一份摘要
        agent.process_message("하나", None).await;
        agent.process_message("둘", None).await;
        assert_eq!(schema.calls.load(Ordering::SeqCst), 1);

        // 只有显式失效才重新拉取
        agent.invalidate_digest().await;
        agent.process_message("셋", None).await;
        assert_eq!(schema.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_switch_to_missing_provider_rejected() {
        let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock");
        let (agent, _) = agent_with(backend);
        let out = agent.switch_provider(ProviderId::Claude).await;
        assert!(!out.success);
        assert_eq!(agent.active_provider().await, Some(ProviderId::OpenAi));
    }

    #[test]
    fn test_clamp_history_cuts_whole_turns() {
        let mut history = vec![
            ChatMessage::user("q1"),
            ChatMessage::Assistant {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: "c1".into(),
                    name: "read_file".into(),
                    arguments: "{}".into(),
                }],
            },
            ChatMessage::ToolResult {
                call_id: "c1".into(),
                name: "read_file".into(),
                content: "{}".into(),
            },
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
            ChatMessage::assistant("a2"),
            ChatMessage::user("q3"),
            ChatMessage::assistant("a3"),
        ];
        clamp_history(&mut history, 2);
        assert_eq!(history.len(), 4);
        assert!(matches!(&history[0], ChatMessage::User { text } if text == "q2"));
    }

    #[test]
    fn test_ledger_annotation_smoke() {
        let mut ledger = TurnLedger::new();
        ledger.add(ProviderId::OpenAi, "gpt-4o-mini", TokenUsage::new(100, 50));
        let table = PricingTable::default();
        assert!(table.annotation(&ledger).is_ok());
    }
}
