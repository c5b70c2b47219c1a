//! 协作方包装工具
//!
//! web_search / read_pdf / set_reminder / semantic_search / graph_search /
//! find_connection 把外部引擎契约暴露成模型可调用的工具；
//! 引擎错误在这里变成 Err(message)，由 Dispatcher 转成 {"error": ...}。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::retrieval::{GraphSearch, PdfReader, VectorSearch, WebSearch};
use crate::store::ReminderStore;
use crate::tools::registry::Tool;

/// graph_search 默认遍历深度
const DEFAULT_GRAPH_DEPTH: usize = 2;
/// semantic_search 默认 topK
const DEFAULT_TOP_K: usize = 5;

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing argument: {key}"))
}

/// web_search：外部搜索引擎
pub struct WebSearchTool {
    engine: Arc<dyn WebSearch>,
}

impl WebSearchTool {
    pub fn new(engine: Arc<dyn WebSearch>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return ranked results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let query = str_arg(&args, "query")?;
        self.engine.search(query).await.map_err(|e| e.to_string())
    }
}

/// read_pdf：PDF 文本抽取
pub struct ReadPdfTool {
    reader: Arc<dyn PdfReader>,
}

impl ReadPdfTool {
    pub fn new(reader: Arc<dyn PdfReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl Tool for ReadPdfTool {
    fn name(&self) -> &str {
        "read_pdf"
    }

    fn description(&self) -> &str {
        "Extract the text of a PDF file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"filePath": {"type": "string"}},
            "required": ["filePath"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let path = str_arg(&args, "filePath")?;
        let text = self.reader.read(path).await.map_err(|e| e.to_string())?;
        Ok(json!({"path": path, "text": text}))
    }
}

/// set_reminder：提醒创建（调度与送达在外部传输层）
pub struct SetReminderTool {
    store: Arc<dyn ReminderStore>,
}

impl SetReminderTool {
    pub fn new(store: Arc<dyn ReminderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SetReminderTool {
    fn name(&self) -> &str {
        "set_reminder"
    }

    fn description(&self) -> &str {
        "Create a reminder. 'due' is an RFC 3339 timestamp, e.g. 2026-09-01T09:00:00+09:00."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "due": {"type": "string", "description": "RFC 3339 timestamp"}
            },
            "required": ["text", "due"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let text = str_arg(&args, "text")?;
        let due_raw = str_arg(&args, "due")?;
        let due = chrono::DateTime::parse_from_rfc3339(due_raw)
            .map_err(|e| format!("Bad due timestamp: {e}"))?
            .with_timezone(&chrono::Utc);
        let reminder = self
            .store
            .create(text, due)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({"id": reminder.id, "text": reminder.text, "due": reminder.due.to_rfc3339()}))
    }
}

/// semantic_search：向量相似检索
pub struct SemanticSearchTool {
    engine: Arc<dyn VectorSearch>,
}

impl SemanticSearchTool {
    pub fn new(engine: Arc<dyn VectorSearch>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for SemanticSearchTool {
    fn name(&self) -> &str {
        "semantic_search"
    }

    fn description(&self) -> &str {
        "Vector-similarity search over the vault. Returns ranked documents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "topK": {"type": "integer", "minimum": 1}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let query = str_arg(&args, "query")?;
        let top_k = args
            .get("topK")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_TOP_K);
        let hits = self
            .engine
            .search(query, top_k)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "results": hits
                .iter()
                .map(|h| json!({
                    "docId": h.doc_id,
                    "score": h.score,
                    "preview": h.preview,
                    "priority": h.priority
                }))
                .collect::<Vec<_>>()
        }))
    }
}

/// graph_search：关系图检索
pub struct GraphSearchTool {
    engine: Arc<dyn GraphSearch>,
}

impl GraphSearchTool {
    pub fn new(engine: Arc<dyn GraphSearch>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for GraphSearchTool {
    fn name(&self) -> &str {
        "graph_search"
    }

    fn description(&self) -> &str {
        "Graph search over vault links and tags: direct matches plus related documents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "depth": {"type": "integer", "minimum": 1}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let query = str_arg(&args, "query")?;
        let depth = args
            .get("depth")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_GRAPH_DEPTH);
        let result = self
            .engine
            .graph_search(query, depth)
            .await
            .map_err(|e| e.to_string())?;
        let to_json = |hits: &[crate::retrieval::RetrievalHit]| {
            hits.iter()
                .map(|h| json!({"docId": h.doc_id, "score": h.score, "preview": h.preview}))
                .collect::<Vec<_>>()
        };
        Ok(json!({
            "directMatches": to_json(&result.direct_matches),
            "relatedDocs": to_json(&result.related_docs)
        }))
    }
}

/// find_connection：两份笔记间的连接路径
pub struct FindConnectionTool {
    engine: Arc<dyn GraphSearch>,
}

impl FindConnectionTool {
    pub fn new(engine: Arc<dyn GraphSearch>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for FindConnectionTool {
    fn name(&self) -> &str {
        "find_connection"
    }

    fn description(&self) -> &str {
        "Find the link path connecting two vault notes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "from": {"type": "string"},
                "to": {"type": "string"}
            },
            "required": ["from", "to"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let from = str_arg(&args, "from")?;
        let to = str_arg(&args, "to")?;
        let path = self
            .engine
            .find_path(from, to)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({"path": path, "connected": !path.is_empty()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AgentError;
    use crate::retrieval::NoopRetrieval;
    use crate::store::InMemoryStore;

    struct FixedWeb;

    #[async_trait]
    impl WebSearch for FixedWeb {
        async fn search(&self, query: &str) -> Result<Value, AgentError> {
            Ok(json!({"results": [{"title": format!("{query} 결과"), "url": "https://example.com"}]}))
        }
    }

    struct FixedPdf;

    #[async_trait]
    impl PdfReader for FixedPdf {
        async fn read(&self, _path: &str) -> Result<String, AgentError> {
            Ok("3분기 실적 요약".into())
        }
    }

    #[tokio::test]
    async fn test_web_search_forwards_engine_payload() {
        let tool = WebSearchTool::new(Arc::new(FixedWeb));
        let out = tool.execute(json!({"query": "금리"})).await.unwrap();
        assert_eq!(out["results"][0]["title"], "금리 결과");
    }

    #[tokio::test]
    async fn test_web_search_without_engine_returns_empty() {
        let tool = WebSearchTool::new(Arc::new(NoopRetrieval));
        let out = tool.execute(json!({"query": "금리"})).await.unwrap();
        assert_eq!(out["results"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_read_pdf_wraps_path_and_text() {
        let tool = ReadPdfTool::new(Arc::new(FixedPdf));
        let out = tool
            .execute(json!({"filePath": "reports/q3.pdf"}))
            .await
            .unwrap();
        assert_eq!(out["path"], "reports/q3.pdf");
        assert_eq!(out["text"], "3분기 실적 요약");
    }

    #[tokio::test]
    async fn test_read_pdf_without_engine_reports_error() {
        let tool = ReadPdfTool::new(Arc::new(NoopRetrieval));
        let err = tool
            .execute(json!({"filePath": "reports/q3.pdf"}))
            .await
            .unwrap_err();
        assert!(err.contains("not configured"));
    }

    #[tokio::test]
    async fn test_semantic_search_empty_engine() {
        let tool = SemanticSearchTool::new(Arc::new(NoopRetrieval));
        let out = tool.execute(json!({"query": "투자 전략"})).await.unwrap();
        assert_eq!(out["results"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_set_reminder_parses_rfc3339() {
        let store = Arc::new(InMemoryStore::new());
        let tool = SetReminderTool::new(store.clone());
        let out = tool
            .execute(json!({"text": "실적 발표 확인", "due": "2026-09-01T09:00:00+09:00"}))
            .await
            .unwrap();
        assert!(out["id"].as_str().is_some());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_reminder_rejects_bad_timestamp() {
        let tool = SetReminderTool::new(Arc::new(InMemoryStore::new()));
        let err = tool
            .execute(json!({"text": "x", "due": "tomorrow"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Bad due timestamp"));
    }

    #[tokio::test]
    async fn test_find_connection_reports_disconnected() {
        let tool = FindConnectionTool::new(Arc::new(NoopRetrieval));
        let out = tool
            .execute(json!({"from": "a.md", "to": "b.md"}))
            .await
            .unwrap();
        assert_eq!(out["connected"], false);
    }
}
