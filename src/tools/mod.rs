//! 工具层：契约、注册表、派发器与内置工具
//!
//! vault 工具直接操作本地文件（带沙箱），collab 工具包外部引擎，
//! script 工具跑白名单内的本地脚本。

pub mod collab;
pub mod dispatcher;
pub mod registry;
pub mod script;
pub mod vault;

pub use collab::{
    FindConnectionTool, GraphSearchTool, ReadPdfTool, SemanticSearchTool, SetReminderTool,
    WebSearchTool,
};
pub use dispatcher::{ToolDispatcher, ToolResult};
pub use registry::{Tool, ToolRegistry};
pub use script::RunScriptTool;
pub use vault::{
    CopyToVaultTool, JournalMemoryTool, ListDirTool, ObsidianLinkTool, ReadFileTool,
    SearchContentTool, SearchFilesTool, VaultFs, WriteFileTool,
};
