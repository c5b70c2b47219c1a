//! Context Assembler：每轮请求的 system 指令装配
//!
//! 固定顺序：persona 段 → 记忆文档摘录（identity / 用户画像 / 最近日志，
//! 各按字符预算截断）→ vault schema 摘要。schema 摘要来自检索后端统计，
//! 带 TTL 缓存（默认 300 秒），vault 写入后可显式失效。
//! 记忆文档缺失或读取失败只是少一段，不阻断装配。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::ContextSection;
use crate::persona::Persona;
use crate::retrieval::SchemaSource;

/// 参与装配的记忆文档（vault memory 目录下的固定文件名）
const MEMORY_FILES: &[(&str, &str)] = &[
    ("identity.md", "Identity"),
    ("user_profile.md", "User profile"),
    ("recent_journal.md", "Recent journal"),
];

/// schema 摘要的 TTL 缓存
struct SchemaDigestCache {
    ttl: Duration,
    slot: Mutex<Option<(Instant, String)>>,
}

impl SchemaDigestCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    async fn get_or_refresh(&self, source: &dyn SchemaSource) -> Option<String> {
        let mut slot = self.slot.lock().await;
        if let Some((at, digest)) = slot.as_ref() {
            if at.elapsed() < self.ttl {
                return Some(digest.clone());
            }
        }
        match source.schema().await {
            Ok(schema) => {
                let digest = format!(
                    "[Vault schema] {} docs, {} links. Top tags: {}. Recent: {}",
                    schema.doc_count,
                    schema.link_count,
                    schema.top_tags.join(", "),
                    schema.recent_docs.join(", ")
                );
                *slot = Some((Instant::now(), digest.clone()));
                Some(digest)
            }
            Err(e) => {
                tracing::warn!(error = %e, "schema digest refresh failed, omitting");
                None
            }
        }
    }

    async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

/// 装配器：persona + 记忆摘录 + schema 摘要
pub struct ContextAssembler {
    persona: Persona,
    memory_dir: Option<PathBuf>,
    excerpt_chars: usize,
    schema_source: Arc<dyn SchemaSource>,
    digest_cache: SchemaDigestCache,
}

impl ContextAssembler {
    pub fn new(
        persona: Persona,
        cfg: &ContextSection,
        schema_source: Arc<dyn SchemaSource>,
    ) -> Self {
        Self {
            persona,
            memory_dir: cfg.memory_dir.clone(),
            excerpt_chars: cfg.excerpt_chars,
            schema_source,
            digest_cache: SchemaDigestCache::new(Duration::from_secs(cfg.digest_ttl_secs)),
        }
    }

    /// 装配 system 指令；任何一段缺失都静默跳过
    pub async fn assemble(&self) -> String {
        let mut sections = vec![self.persona.render()];

        if let Some(dir) = &self.memory_dir {
            for (file, title) in MEMORY_FILES {
                match std::fs::read_to_string(dir.join(file)) {
                    Ok(raw) => {
                        let excerpt = truncate_chars(raw.trim(), self.excerpt_chars);
                        if !excerpt.is_empty() {
                            sections.push(format!("[{title}]\n{excerpt}"));
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(file = %file, error = %e, "memory doc unreadable, skipping");
                    }
                }
            }
        }

        if let Some(digest) = self.digest_cache.get_or_refresh(&*self.schema_source).await {
            sections.push(digest);
        }

        sections.join("\n\n")
    }

    /// vault 写入后调用，下一轮重新拉 schema
    pub async fn invalidate_digest(&self) {
        self.digest_cache.invalidate().await;
    }
}

fn truncate_chars(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        return s.to_string();
    }
    let cut: String = s.chars().take(budget).collect();
    format!("{cut}\n[...truncated]")
}
