//! 预检索触发器
//!
//! 检索本身多一次往返，所以先过启发式闸门：消息长度达到下限 且 命中至少一个
//! 主题词模式（领域词汇 / 已知实体名），短问候和斜杠命令永不触发。
//! 触发后提取有限个关键词做相似检索，高优先命中（追踪名单内条目）无视原始分数
//! 排在普通命中之前，把摘要拼在用户消息前面。检索失败静默降级为"无额外上下文"。

use std::sync::Arc;

use regex::Regex;

use crate::config::RetrievalSection;
use crate::retrieval::traits::{RetrievalHit, VectorSearch};

/// 摘要里每条命中的预览截断
const DIGEST_PREVIEW_CHARS: usize = 120;

/// 触发器：长度门限 + 主题模式，命中后注入排序摘要
pub struct RetrievalTrigger {
    min_chars: usize,
    patterns: Vec<Regex>,
    max_keywords: usize,
    top_k: usize,
    vector: Arc<dyn VectorSearch>,
}

impl RetrievalTrigger {
    pub fn new(cfg: &RetrievalSection, vector: Arc<dyn VectorSearch>) -> Self {
        let patterns = cfg
            .patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid retrieval pattern skipped");
                    None
                }
            })
            .collect();
        Self {
            min_chars: cfg.min_chars,
            patterns,
            max_keywords: cfg.max_keywords,
            top_k: cfg.top_k,
            vector,
        }
    }

    /// 闸门：长度达标且至少命中一个主题模式；命令（/ 开头）一律跳过
    pub fn should_trigger(&self, message: &str) -> bool {
        let message = message.trim();
        if message.starts_with('/') {
            return false;
        }
        if message.chars().count() < self.min_chars {
            return false;
        }
        self.patterns.iter().any(|p| p.is_match(message))
    }

    /// 模式命中片段做关键词，数量有界
    pub fn extract_keywords(&self, message: &str) -> Vec<String> {
        let mut keywords = Vec::new();
        for p in &self.patterns {
            for m in p.find_iter(message) {
                let kw = m.as_str().to_string();
                if !keywords.contains(&kw) {
                    keywords.push(kw);
                }
                if keywords.len() >= self.max_keywords {
                    return keywords;
                }
            }
        }
        keywords
    }

    /// 高优先命中整体排前，组内按分数降序
    pub fn rank(mut hits: Vec<RetrievalHit>) -> Vec<RetrievalHit> {
        hits.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
        });
        hits
    }

    /// 未触发或检索失败返回原消息；触发成功则在消息前拼上摘要
    pub async fn augment(&self, message: &str) -> String {
        if !self.should_trigger(message) {
            return message.to_string();
        }
        let keywords = self.extract_keywords(message);
        let query = if keywords.is_empty() {
            message.to_string()
        } else {
            keywords.join(" ")
        };

        let hits = match self.vector.search(&query, self.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, continuing without context");
                return message.to_string();
            }
        };
        if hits.is_empty() {
            return message.to_string();
        }

        let ranked = Self::rank(hits);
        let mut digest = String::from("[Vault context]\n");
        for hit in ranked.iter().take(self.top_k) {
            let preview: String = hit.preview.chars().take(DIGEST_PREVIEW_CHARS).collect();
            let flag = if hit.priority { "★ " } else { "" };
            digest.push_str(&format!(
                "- {}{} ({:.2}): {}\n",
                flag,
                hit.doc_id,
                hit.score,
                preview.trim()
            ));
        }
        format!("{digest}\n{message}")
    }
}
