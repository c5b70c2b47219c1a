//! 检索协作方契约
//!
//! 向量检索 / 图检索 / Web 搜索 / PDF 解析 / schema 统计都是外部引擎，
//! 这里只定义调用契约；引擎本体（索引数学、图遍历）不在本仓库范围内。

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;

/// 一条排序后的检索命中
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub doc_id: String,
    pub score: f32,
    pub preview: String,
    /// 高优先文档（如投资追踪名单内的条目）排序时压过原始分数
    pub priority: bool,
}

/// 向量相似检索
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, AgentError>;
}

/// 图检索结果：直接命中 + 关系扩展出的文档
#[derive(Debug, Clone, Default)]
pub struct GraphResult {
    pub direct_matches: Vec<RetrievalHit>,
    pub related_docs: Vec<RetrievalHit>,
}

/// 关系图检索（GraphRAG）
#[async_trait]
pub trait GraphSearch: Send + Sync {
    async fn graph_search(&self, query: &str, depth: usize) -> Result<GraphResult, AgentError>;

    /// 两份文档间的连接路径（doc id 序列）
    async fn find_path(&self, from: &str, to: &str) -> Result<Vec<String>, AgentError>;
}

/// 外部 Web 搜索引擎
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Value, AgentError>;
}

/// PDF 文本抽取引擎
#[async_trait]
pub trait PdfReader: Send + Sync {
    async fn read(&self, path: &str) -> Result<String, AgentError>;
}

/// 检索后端 schema 统计（Context Assembler 的摘要来源）
#[derive(Debug, Clone, Default)]
pub struct VaultSchema {
    pub doc_count: usize,
    pub link_count: usize,
    pub top_tags: Vec<String>,
    pub recent_docs: Vec<String>,
}

#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn schema(&self) -> Result<VaultSchema, AgentError>;
}

/// 全空实现：未接入外部引擎时使用。检索类契约静默返回空结果，
/// read_pdf 这种必须有产出的契约则报"未配置"错误
#[derive(Debug, Default, Clone)]
pub struct NoopRetrieval;

#[async_trait]
impl VectorSearch for NoopRetrieval {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievalHit>, AgentError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl GraphSearch for NoopRetrieval {
    async fn graph_search(&self, _query: &str, _depth: usize) -> Result<GraphResult, AgentError> {
        Ok(GraphResult::default())
    }

    async fn find_path(&self, _from: &str, _to: &str) -> Result<Vec<String>, AgentError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl SchemaSource for NoopRetrieval {
    async fn schema(&self) -> Result<VaultSchema, AgentError> {
        Ok(VaultSchema::default())
    }
}

#[async_trait]
impl WebSearch for NoopRetrieval {
    async fn search(&self, _query: &str) -> Result<Value, AgentError> {
        Ok(serde_json::json!({"results": []}))
    }
}

#[async_trait]
impl PdfReader for NoopRetrieval {
    async fn read(&self, _path: &str) -> Result<String, AgentError> {
        Err(AgentError::ToolExecutionFailed(
            "PDF reader not configured".into(),
        ))
    }
}
