//! Maru - 个人知识库智能体
//!
//! 入口：初始化日志、装配编排器，跑一个最小 REPL。
//! 检索引擎与持久化默认用内置的空实现/内存实现，外部引擎按部署接线。

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use maru::agent::Agent;
use maru::config::load_config;
use maru::context::ContextAssembler;
use maru::llm::{build_registry, AutoRouter, ProviderId};
use maru::persona::Persona;
use maru::retrieval::{NoopRetrieval, RetrievalTrigger};
use maru::store::InMemoryStore;
use maru::tools::{
    CopyToVaultTool, FindConnectionTool, GraphSearchTool, JournalMemoryTool, ListDirTool,
    ObsidianLinkTool, ReadFileTool, ReadPdfTool, RunScriptTool, SearchContentTool,
    SearchFilesTool, SemanticSearchTool, SetReminderTool, ToolDispatcher, ToolRegistry, VaultFs,
    WebSearchTool, WriteFileTool,
};
use maru::usage::PricingTable;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    maru::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;

    let registry = build_registry(&cfg.providers);
    let router = if cfg.router.auto {
        let classifier_id: ProviderId = cfg
            .router
            .classifier
            .parse()
            .context("Bad router.classifier")?;
        match registry.get(classifier_id) {
            Some(classifier) => Some(AutoRouter::new(
                classifier,
                cfg.router.simple_target.parse().context("Bad router.simple_target")?,
                cfg.router.complex_target.parse().context("Bad router.complex_target")?,
            )),
            None => {
                tracing::warn!("router classifier backend unavailable, auto routing disabled");
                None
            }
        }
    } else {
        None
    };

    let store = Arc::new(InMemoryStore::new());
    let retrieval = Arc::new(NoopRetrieval);

    let mut tools = ToolRegistry::new();
    if let Some(root) = &cfg.agent.vault_root {
        let fs = VaultFs::new(root);
        tools.register(ReadFileTool::new(fs.clone()));
        tools.register(WriteFileTool::new(fs.clone()));
        tools.register(ListDirTool::new(fs.clone()));
        tools.register(SearchFilesTool::new(fs.clone()));
        tools.register(SearchContentTool::new(fs.clone()));
        tools.register(CopyToVaultTool::new(fs.clone()));
        tools.register(JournalMemoryTool::new(fs.clone()));
        tools.register(ObsidianLinkTool::new(fs.clone()));
        tools.register(RunScriptTool::new(
            root.join("scripts"),
            cfg.tools.script_allowlist.clone(),
            cfg.tools.tool_timeout_secs,
        ));
    } else {
        tracing::warn!("agent.vault_root not set, vault tools disabled");
    }
    tools.register(SetReminderTool::new(store.clone()));
    tools.register(SemanticSearchTool::new(retrieval.clone()));
    tools.register(GraphSearchTool::new(retrieval.clone()));
    tools.register(FindConnectionTool::new(retrieval.clone()));
    tools.register(WebSearchTool::new(retrieval.clone()));
    tools.register(ReadPdfTool::new(retrieval.clone()));

    let persona = Persona::load(cfg.agent.persona_path.as_deref());
    let agent = Agent::new(
        &cfg,
        registry,
        router,
        RetrievalTrigger::new(&cfg.retrieval, retrieval.clone()),
        ContextAssembler::new(persona, &cfg.context, retrieval.clone()),
        ToolDispatcher::new(tools, cfg.tools.tool_timeout_secs),
        PricingTable::from_config(&cfg.pricing),
        store.clone(),
        store.clone(),
    );

    println!("maru ready. /switch <provider>, /topic <name>, /topic off, /quit");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("/switch ") {
            match rest.trim().parse::<ProviderId>() {
                Ok(id) => println!("{}", agent.switch_provider(id).await.message),
                Err(e) => println!("{e}"),
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("/topic") {
            let rest = rest.trim();
            if rest.is_empty() || rest == "off" {
                agent.switch_topic(None).await;
                println!("topic cleared");
            } else {
                agent.switch_topic(Some(rest)).await;
                println!("topic: {rest}");
            }
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        let reply = agent.process_message(line, None).await;
        println!("{}", reply.text);
        if let Some(note) = reply.annotation {
            println!("  [{note}]");
        }
    }

    Ok(())
}
