//! Persona 配置
//!
//! name/role/tone/instructions 组成 system 指令的固定开头；
//! 文件缺失或格式损坏时回退到内置最小 persona，绝不因此阻断启动。

use std::path::Path;

use serde::Deserialize;

/// Persona：随每次请求发送的固定人格/策略文本
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Persona {
    pub name: String,
    pub role: String,
    pub tone: String,
    pub instructions: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Maru".into(),
            role: "personal knowledge-base assistant".into(),
            tone: "concise and direct".into(),
            instructions: "Answer using the vault context when relevant. \
                           Use tools when you need file contents, search results or reminders."
                .into(),
        }
    }
}

impl Persona {
    /// 从 TOML 文件加载；读不到或解析失败都回退默认并告警
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str::<Persona>(&raw) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "malformed persona, using default");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "persona file unreadable, using default");
                Self::default()
            }
        }
    }

    /// 渲染为 system 指令开头段落
    pub fn render(&self) -> String {
        format!(
            "You are {}, a {}. Tone: {}.\n{}",
            self.name, self.role, self.tone, self.instructions
        )
    }
}
