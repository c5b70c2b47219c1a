//! 全管线集成测试
//!
//! 用 ScriptedBackend 跑真实的 Agent 管线：工具调用回合、循环上限、
//! 后端切换拒绝、预检索注入。vault 工具落在 tempdir 上，不碰真实文件。

use std::sync::Arc;

use maru::agent::Agent;
use maru::config::AppConfig;
use maru::context::ContextAssembler;
use maru::llm::{
    ChatBackend, ChatOutcome, ProviderId, ProviderRegistry, ScriptedBackend, TokenUsage, ToolCall,
};
use maru::persona::Persona;
use maru::retrieval::{NoopRetrieval, RetrievalTrigger};
use maru::store::{ConversationStore, InMemoryStore, TurnRole};
use maru::tools::{ReadFileTool, ToolDispatcher, ToolRegistry, VaultFs, WriteFileTool};
use maru::usage::PricingTable;

fn read_call(path: &str) -> ToolCall {
    ToolCall {
        id: "call_read".into(),
        name: "read_file".into(),
        arguments: format!(r#"{{"filePath":"{path}"}}"#),
    }
}

fn build_agent(
    backend: ScriptedBackend,
    vault: &std::path::Path,
) -> (Agent, Arc<InMemoryStore>) {
    let cfg = AppConfig::default();
    let store = Arc::new(InMemoryStore::new());

    let mut registry = ProviderRegistry::new(backend.provider());
    registry.insert(Arc::new(backend));

    let fs = VaultFs::new(vault);
    let mut tools = ToolRegistry::new();
    tools.register(ReadFileTool::new(fs.clone()));
    tools.register(WriteFileTool::new(fs));

    let agent = Agent::new(
        &cfg,
        registry,
        None,
        RetrievalTrigger::new(&cfg.retrieval, Arc::new(NoopRetrieval)),
        ContextAssembler::new(Persona::default(), &cfg.context, Arc::new(NoopRetrieval)),
        ToolDispatcher::new(tools, cfg.tools.tool_timeout_secs),
        PricingTable::default().with_entry(ProviderId::OpenAi, "mock", 1.0, 2.0),
        store.clone(),
        store.clone(),
    );
    (agent, store)
}

#[tokio::test]
async fn test_tool_call_turn_end_to_end() {
    let vault = tempfile::tempdir().unwrap();
    std::fs::write(vault.path().join("tracker.md"), "# 투자 트래커\n- 삼성전자").unwrap();

    let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock")
        .push(ChatOutcome {
            text: String::new(),
            tool_calls: vec![read_call("tracker.md")],
            usage: TokenUsage::new(500, 20),
        })
        .push(ChatOutcome {
            text: "트래커에는 삼성전자가 있어요".into(),
            tool_calls: vec![],
            usage: TokenUsage::new(700, 40),
        });
    let (agent, store) = build_agent(backend, vault.path());

    let reply = agent.process_message("트래커 파일 읽어줘", None).await;
    assert_eq!(reply.text, "트래커에는 삼성전자가 있어요");
    // 两次迭代的用量求和后注记
    let note = reply.annotation.unwrap();
    assert!(note.starts_with("1200 in / 60 out tokens"));

    let turns = store.history(10).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].text, "트래커 파일 읽어줘");
    assert_eq!(turns[1].role, TurnRole::Assistant);
    assert_eq!(turns[1].input_tokens, 1200);
    assert_eq!(turns[1].output_tokens, 60);
}

#[tokio::test]
async fn test_react_ceiling_degrades_gracefully() {
    let vault = tempfile::tempdir().unwrap();
    std::fs::write(vault.path().join("a.md"), "x").unwrap();

    // 永远要求工具调用：应在 max_react_steps 次后收尾而不是报错
    let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock").repeating(ChatOutcome {
        text: String::new(),
        tool_calls: vec![read_call("a.md")],
        usage: TokenUsage::new(10, 1),
    });
    let (agent, store) = build_agent(backend, vault.path());

    let reply = agent.process_message("계속 읽기만 해", None).await;
    assert_eq!(reply.text, "");
    // 5 次迭代的用量都被计入
    assert!(reply.annotation.unwrap().starts_with("50 in / 5 out tokens"));
    assert_eq!(store.history(10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_switch_to_missing_provider_keeps_active() {
    let vault = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock");
    let (agent, _) = build_agent(backend, vault.path());

    let out = agent.switch_provider(ProviderId::Gemini).await;
    assert!(!out.success);
    assert!(out.message.contains("not available"));
    assert_eq!(agent.active_provider().await, Some(ProviderId::OpenAi));

    let out = agent.switch_provider(ProviderId::OpenAi).await;
    assert!(out.success);
}

#[tokio::test]
async fn test_tool_failure_is_fed_back_not_fatal() {
    let vault = tempfile::tempdir().unwrap();
    // 文件不存在：第一回合工具失败，第二回合模型纠正
    let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock")
        .push(ChatOutcome {
            text: String::new(),
            tool_calls: vec![read_call("missing.md")],
            usage: TokenUsage::new(10, 1),
        })
        .push(ChatOutcome {
            text: "그 파일은 없네요".into(),
            tool_calls: vec![],
            usage: TokenUsage::new(12, 5),
        });
    let (agent, _) = build_agent(backend, vault.path());

    let reply = agent.process_message("missing.md 읽어줘", None).await;
    assert_eq!(reply.text, "그 파일은 없네요");
}

#[tokio::test]
async fn test_streaming_sink_receives_cumulative_text() {
    let vault = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(ProviderId::OpenAi, "mock").push(ChatOutcome {
        text: "안녕하세요".into(),
        tool_calls: vec![],
        usage: TokenUsage::new(5, 5),
    });
    let (agent, _) = build_agent(backend, vault.path());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let reply = agent.process_message("인사해줘", Some(&tx)).await;
    assert_eq!(reply.text, "안녕하세요");

    drop(agent);
    drop(tx);
    let mut last = String::new();
    while let Some(chunk) = rx.recv().await {
        // 每个分片都是累计全文，必须是最终文本的前缀
        assert!("안녕하세요".starts_with(&chunk));
        last = chunk;
    }
    assert_eq!(last, "안녕하세요");
}
