//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MARU__*` 覆盖（双下划线表示嵌套，
//! 如 `MARU__AGENT__MAX_REACT_STEPS=8`）。API Key 不写进配置文件，
//! 每个后端只记 Key 所在的环境变量名；缺 Key 时禁用该后端而非启动失败。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub providers: ProvidersSection,
    pub retry: RetrySection,
    pub retrieval: RetrievalSection,
    pub context: ContextSection,
    pub router: RouterSection,
    pub tools: ToolsSection,
    pub pricing: PricingSection,
}

/// [agent] 段：循环上限、历史轮数、vault 根目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单轮对话内 ReAct 迭代上限；到达后用最后一次文本收尾（降级而非报错）
    pub max_react_steps: usize,
    /// 工作历史保留轮数
    pub max_history_turns: usize,
    /// Obsidian vault 根目录（文件工具的沙箱根）
    pub vault_root: Option<PathBuf>,
    /// persona 配置文件路径
    pub persona_path: Option<PathBuf>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_react_steps: 5,
            max_history_turns: 20,
            vault_root: None,
            persona_path: None,
        }
    }
}

/// [providers] 段：三个后端的模型与 Key 环境变量名
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersSection {
    /// 默认激活的后端：gemini / claude / openai
    pub default: Option<String>,
    pub gemini: ProviderSection,
    pub claude: ProviderSection,
    pub openai: ProviderSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// API Key 所在环境变量名；变量缺失时该后端被禁用
    pub api_key_env: Option<String>,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            model: None,
            base_url: None,
            api_key_env: None,
        }
    }
}

/// [retry] 段：固定延时重试（非指数、非抖动）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: usize,
    pub delay_secs: Vec<u64>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: vec![1, 3, 5],
        }
    }
}

/// [retrieval] 段：预检索触发门限与注入规模
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    /// 触发的最小消息字符数；短问候/命令永不触发
    pub min_chars: usize,
    /// 主题词模式（regex）；仅示例性配置，契约只有"触发/不触发"
    pub patterns: Vec<String>,
    /// 关键词提取上限
    pub max_keywords: usize,
    /// 相似检索 topK
    pub top_k: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            min_chars: 12,
            // 原部署的投资/知识库词汇，可整体替换
            patterns: vec![
                r"(?i)종목|주가|투자|매수|매도|실적|트리거".into(),
                r"(?i)stock|invest|earnings|portfolio|trigger".into(),
                r"(?i)vault|노트|메모|일지|note|journal|reminder".into(),
                r"(?i)삼성전자|하이브|휴젤|효성중공업|현대모비스".into(),
            ],
            max_keywords: 5,
            top_k: 5,
        }
    }
}

/// [context] 段：记忆摘录预算与 schema 摘要缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    /// 每份记忆文档（identity / profile / journal）截断的字符预算
    pub excerpt_chars: usize,
    /// schema 摘要缓存 TTL（秒）
    pub digest_ttl_secs: u64,
    /// 记忆文档目录（vault 下相对路径）
    pub memory_dir: Option<PathBuf>,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            excerpt_chars: 1500,
            digest_ttl_secs: 300,
            memory_dir: None,
        }
    }
}

/// [router] 段：自动路由（简单->轻量后端，复杂->高质量后端）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub auto: bool,
    /// 分类调用走哪个后端（便宜的那个）
    pub classifier: String,
    pub simple_target: String,
    pub complex_target: String,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            auto: false,
            classifier: "gemini".into(),
            simple_target: "gemini".into(),
            complex_target: "claude".into(),
        }
    }
}

/// [tools] 段：run_script 白名单与单次调用超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 允许 run_script 执行的脚本名（精确匹配，不含路径）
    pub script_allowlist: Vec<String>,
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            script_allowlist: vec![
                "update_tracker.py".into(),
                "fnguide_scraper.py".into(),
                "check-gmail.py".into(),
            ],
            tool_timeout_secs: 30,
        }
    }
}

/// [pricing] 段：(provider, model) -> 每百万 token 价格（USD）与换算汇率
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingSection {
    /// 展示货币对 USD 的汇率（默认 KRW）
    pub fx_rate: f64,
    pub currency_symbol: String,
    pub models: Vec<ModelPriceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelPriceEntry {
    pub provider: String,
    pub model: String,
    pub input_per_m_usd: f64,
    pub output_per_m_usd: f64,
}

impl Default for PricingSection {
    fn default() -> Self {
        Self {
            fx_rate: 1350.0,
            currency_symbol: "₩".into(),
            models: Vec::new(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 MARU__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MARU__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MARU")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
