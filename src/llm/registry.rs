//! 后端注册表与显式切换
//!
//! "当前后端"是注册表实例持有的显式字段，只能通过 switch 改变（返回结果型 SwitchOutcome），
//! 不存在模块级全局。缺 API Key 的后端在构建时就不注册（只告警，不影响启动），
//! 向它切换会失败且现任后端保持不变 —— 切换要么完整成功要么被拒绝。

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ProviderSection, ProvidersSection};
use crate::llm::claude::ClaudeBackend;
use crate::llm::gemini::GeminiBackend;
use crate::llm::openai::OpenAiBackend;
use crate::llm::traits::{ChatBackend, ProviderId};

/// 切换结果：success=false 时现任后端未被改动
#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    pub success: bool,
    pub message: String,
}

/// 后端注册表：持有可用后端与当前激活 id
pub struct ProviderRegistry {
    backends: HashMap<ProviderId, Arc<dyn ChatBackend>>,
    active: ProviderId,
}

impl ProviderRegistry {
    pub fn new(active: ProviderId) -> Self {
        Self {
            backends: HashMap::new(),
            active,
        }
    }

    /// 注册一个后端；首个注册的后端在现任不可用时兜底
    pub fn insert(&mut self, backend: Arc<dyn ChatBackend>) {
        let id = backend.provider();
        self.backends.insert(id, backend);
        if !self.backends.contains_key(&self.active) {
            self.active = id;
        }
    }

    pub fn active_id(&self) -> ProviderId {
        self.active
    }

    /// 当前激活后端；一个后端都没有时为 None
    pub fn active(&self) -> Option<Arc<dyn ChatBackend>> {
        self.backends.get(&self.active).cloned()
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn ChatBackend>> {
        self.backends.get(&id).cloned()
    }

    pub fn available(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.backends.keys().copied().collect();
        ids.sort_by_key(|i| i.as_str());
        ids
    }

    /// 原子切换：目标后端已注册才改 active，否则整个操作被拒绝
    pub fn switch(&mut self, id: ProviderId) -> SwitchOutcome {
        if self.backends.contains_key(&id) {
            let prev = self.active;
            self.active = id;
            tracing::info!(from = %prev, to = %id, "provider switched");
            SwitchOutcome {
                success: true,
                message: format!("Switched to {id}"),
            }
        } else {
            SwitchOutcome {
                success: false,
                message: format!("Provider {id} is not available (missing credential?)"),
            }
        }
    }
}

/// 从配置构建注册表：逐后端读 Key 环境变量，缺失的只告警并跳过
pub fn build_registry(cfg: &ProvidersSection) -> ProviderRegistry {
    let default = cfg
        .default
        .as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(ProviderId::Gemini);
    let mut registry = ProviderRegistry::new(default);

    if let Some((key, model)) = credential_of(&cfg.gemini, "GEMINI_API_KEY", "gemini-2.0-flash") {
        registry.insert(Arc::new(GeminiBackend::new(
            cfg.gemini.base_url.as_deref(),
            &model,
            &key,
        )));
    }
    if let Some((key, model)) =
        credential_of(&cfg.claude, "ANTHROPIC_API_KEY", "claude-sonnet-4-20250514")
    {
        registry.insert(Arc::new(ClaudeBackend::new(
            cfg.claude.base_url.as_deref(),
            &model,
            &key,
        )));
    }
    if let Some((key, model)) = credential_of(&cfg.openai, "OPENAI_API_KEY", "gpt-4o-mini") {
        registry.insert(Arc::new(OpenAiBackend::new(
            cfg.openai.base_url.as_deref(),
            &model,
            &key,
        )));
    }

    if registry.available().is_empty() {
        tracing::warn!("no provider credential found, agent cannot reach any backend");
    }
    registry
}

fn credential_of(
    section: &ProviderSection,
    default_env: &str,
    default_model: &str,
) -> Option<(String, String)> {
    let env_name = section.api_key_env.as_deref().unwrap_or(default_env);
    match std::env::var(env_name) {
        Ok(key) if !key.is_empty() => {
            let model = section
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string());
            Some((key, model))
        }
        _ => {
            tracing::warn!(env = env_name, "API key missing, backend disabled");
            None
        }
    }
}
