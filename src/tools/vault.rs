//! Vault 文件工具
//!
//! VaultFs 绑定 Obsidian vault 根目录，所有路径经 resolve 校验必须在根下（禁止 ../ 逃逸）。
//! 在其上提供 read_file / write_file / list_dir / search_files / search_content /
//! copy_to_vault / journal_memory / obsidian_link 工具。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::core::AgentError;
use crate::tools::registry::Tool;

/// search_content 单文件命中行预览上限
const MATCH_PREVIEW_CHARS: usize = 160;
/// search_files / search_content 返回条数上限
const MAX_RESULTS: usize = 30;

/// 沙箱 vault：绑定根目录，resolve 校验路径在根下
#[derive(Debug, Clone)]
pub struct VaultFs {
    root: PathBuf,
}

impl VaultFs {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// vault 名（obsidian:// URI 用）
    pub fn vault_name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "vault".into())
    }

    /// 读路径：必须已存在且在根下
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim_start_matches("./");
        let full = self.root.join(path);
        let canonical = full
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {path}")))?;
        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    /// 写路径：文件可以不存在，但父目录规范化后必须在根下
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim_start_matches("./");
        if path.is_empty() {
            return Err(AgentError::ToolExecutionFailed("Empty path".into()));
        }
        let full = self.root.join(path);
        let parent = full
            .parent()
            .ok_or_else(|| AgentError::ToolExecutionFailed(format!("No parent dir: {path}")))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("mkdir failed: {e}")))?;
        let parent = parent
            .canonicalize()
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Resolve failed: {e}")))?;
        if parent.starts_with(&self.root) {
            Ok(parent.join(full.file_name().unwrap_or_default()))
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing argument: {key}"))
}

fn path_schema(key: &str, desc: &str) -> Value {
    json!({
        "type": "object",
        "properties": { key: {"type": "string", "description": desc} },
        "required": [key]
    })
}

/// read_file：读取 vault 内文件
pub struct ReadFileTool {
    fs: VaultFs,
}

impl ReadFileTool {
    pub fn new(fs: VaultFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the vault. Returns its full text content."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("filePath", "Path relative to the vault root")
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let path = str_arg(&args, "filePath")?;
        let resolved = self.fs.resolve(path).map_err(|e| e.to_string())?;
        let content =
            std::fs::read_to_string(&resolved).map_err(|e| format!("Read failed: {e}"))?;
        Ok(json!({"path": path, "content": content}))
    }
}

/// write_file：写入/覆盖 vault 内文件
pub struct WriteFileTool {
    fs: VaultFs,
}

impl WriteFileTool {
    pub fn new(fs: VaultFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text content to a file inside the vault, creating parent directories."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {"type": "string", "description": "Path relative to the vault root"},
                "content": {"type": "string", "description": "Full file content to write"}
            },
            "required": ["filePath", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let path = str_arg(&args, "filePath")?;
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");
        let resolved = self.fs.resolve_for_write(path).map_err(|e| e.to_string())?;
        std::fs::write(&resolved, content).map_err(|e| format!("Write failed: {e}"))?;
        Ok(json!({"path": path, "bytes": content.len()}))
    }
}

/// list_dir：列目录（隐藏文件跳过，目录带 / 后缀）
pub struct ListDirTool {
    fs: VaultFs,
}

impl ListDirTool {
    pub fn new(fs: VaultFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List entries of a vault directory. Directories end with '/'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dirPath": {"type": "string", "description": "Directory path, default vault root"}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let path = args.get("dirPath").and_then(|v| v.as_str()).unwrap_or(".");
        let base = if path == "." || path.is_empty() {
            self.fs.root().to_path_buf()
        } else {
            self.fs.resolve(path).map_err(|e| e.to_string())?
        };
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base).map_err(|e| format!("List failed: {e}"))? {
            let e = e.map_err(|e| e.to_string())?;
            let name = e.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        Ok(json!({"entries": entries}))
    }
}

/// search_files：按 glob 模式找文件名
pub struct SearchFilesTool {
    fs: VaultFs,
}

impl SearchFilesTool {
    pub fn new(fs: VaultFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Find vault files whose name matches a glob pattern, e.g. '*투자*' or '*.md'."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("pattern", "Glob pattern matched against file names")
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let pattern = str_arg(&args, "pattern")?;
        let matcher = glob::Pattern::new(pattern).map_err(|e| format!("Bad pattern: {e}"))?;
        let mut hits = Vec::new();
        for entry in WalkDir::new(self.fs.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if matcher.matches(&name) {
                if let Ok(rel) = entry.path().strip_prefix(self.fs.root()) {
                    hits.push(rel.to_string_lossy().to_string());
                }
                if hits.len() >= MAX_RESULTS {
                    break;
                }
            }
        }
        hits.sort();
        Ok(json!({"matches": hits}))
    }
}

/// search_content：全文子串检索，逐文件返回首个命中行预览
pub struct SearchContentTool {
    fs: VaultFs,
}

impl SearchContentTool {
    pub fn new(fs: VaultFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for SearchContentTool {
    fn name(&self) -> &str {
        "search_content"
    }

    fn description(&self) -> &str {
        "Search vault markdown files for a text query. Returns matching files with a line preview."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("query", "Text to search for (case-insensitive)")
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let query = str_arg(&args, "query")?.to_lowercase();
        let mut hits = Vec::new();
        for entry in WalkDir::new(self.fs.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file()
                    && e.path().extension().map(|x| x == "md").unwrap_or(false)
            })
        {
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            if let Some(line) = content.lines().find(|l| l.to_lowercase().contains(&query)) {
                let preview: String = line.chars().take(MATCH_PREVIEW_CHARS).collect();
                if let Ok(rel) = entry.path().strip_prefix(self.fs.root()) {
                    hits.push(json!({
                        "path": rel.to_string_lossy(),
                        "preview": preview.trim()
                    }));
                }
                if hits.len() >= MAX_RESULTS {
                    break;
                }
            }
        }
        Ok(json!({"matches": hits}))
    }
}

/// copy_to_vault：把 vault 外的文件拷进收集目录
pub struct CopyToVaultTool {
    fs: VaultFs,
    inbox_dir: String,
}

impl CopyToVaultTool {
    pub fn new(fs: VaultFs) -> Self {
        Self {
            fs,
            inbox_dir: "00_Inbox".into(),
        }
    }
}

#[async_trait]
impl Tool for CopyToVaultTool {
    fn name(&self) -> &str {
        "copy_to_vault"
    }

    fn description(&self) -> &str {
        "Copy an external file into the vault inbox directory."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("sourcePath", "Absolute path of the file to copy into the vault")
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let source = str_arg(&args, "sourcePath")?;
        let src = Path::new(source);
        let file_name = src
            .file_name()
            .ok_or_else(|| format!("Not a file: {source}"))?
            .to_string_lossy()
            .to_string();
        let dest_rel = format!("{}/{}", self.inbox_dir, file_name);
        let dest = self
            .fs
            .resolve_for_write(&dest_rel)
            .map_err(|e| e.to_string())?;
        std::fs::copy(src, &dest).map_err(|e| format!("Copy failed: {e}"))?;
        Ok(json!({"copiedTo": dest_rel}))
    }
}

/// journal_memory：向当日日志追加一条带时间戳的记录
pub struct JournalMemoryTool {
    fs: VaultFs,
    journal_dir: String,
}

impl JournalMemoryTool {
    pub fn new(fs: VaultFs) -> Self {
        Self {
            fs,
            journal_dir: "90_Journal".into(),
        }
    }
}

#[async_trait]
impl Tool for JournalMemoryTool {
    fn name(&self) -> &str {
        "journal_memory"
    }

    fn description(&self) -> &str {
        "Append a timestamped memory entry to today's journal note."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("entry", "The text to remember")
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let entry = str_arg(&args, "entry")?;
        let now = chrono::Local::now();
        let rel = format!("{}/{}.md", self.journal_dir, now.format("%Y-%m-%d"));
        let path = self.fs.resolve_for_write(&rel).map_err(|e| e.to_string())?;
        let mut body = std::fs::read_to_string(&path).unwrap_or_default();
        body.push_str(&format!("- [{}] {}\n", now.format("%H:%M"), entry));
        std::fs::write(&path, body).map_err(|e| format!("Write failed: {e}"))?;
        Ok(json!({"journal": rel}))
    }
}

/// obsidian_link：生成笔记的 [[wikilink]] 与 obsidian:// URI
pub struct ObsidianLinkTool {
    fs: VaultFs,
}

impl ObsidianLinkTool {
    pub fn new(fs: VaultFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ObsidianLinkTool {
    fn name(&self) -> &str {
        "obsidian_link"
    }

    fn description(&self) -> &str {
        "Build the [[wikilink]] and obsidian:// URI for a vault note."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("notePath", "Note path relative to the vault root")
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let note = str_arg(&args, "notePath")?;
        self.fs.resolve(note).map_err(|e| e.to_string())?;
        let stem = Path::new(note)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| note.to_string());
        let uri = format!(
            "obsidian://open?vault={}&file={}",
            self.fs.vault_name(),
            note.replace(' ', "%20")
        );
        Ok(json!({"wikilink": format!("[[{stem}]]"), "uri": uri}))
    }
}
