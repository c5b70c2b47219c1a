//! run_script：白名单脚本执行
//!
//! 能执行外部代码的唯一工具。脚本名精确匹配白名单（不含路径分隔符），
//! 名单外一律返回 Unauthorized 且不执行；带超时与 tracing 审计。

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tools::registry::Tool;

/// run_script 工具：仅允许白名单内脚本
pub struct RunScriptTool {
    scripts_dir: PathBuf,
    allowlist: HashSet<String>,
    timeout_secs: u64,
}

impl RunScriptTool {
    pub fn new(scripts_dir: impl Into<PathBuf>, allowlist: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            allowlist: allowlist.into_iter().collect(),
            timeout_secs,
        }
    }

    /// 精确名检查；路径分隔符直接视为越权尝试
    fn authorize(&self, name: &str) -> Result<(), String> {
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err("Unauthorized".into());
        }
        if self.allowlist.contains(name) {
            Ok(())
        } else {
            Err("Unauthorized".into())
        }
    }
}

#[async_trait]
impl Tool for RunScriptTool {
    fn name(&self) -> &str {
        "run_script"
    }

    fn description(&self) -> &str {
        "Run one of the pre-approved maintenance scripts by exact name."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "scriptName": {
                    "type": "string",
                    "description": "Exact script file name from the allow-list"
                }
            },
            "required": ["scriptName"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let name = args
            .get("scriptName")
            .and_then(|v| v.as_str())
            .ok_or("Missing argument: scriptName")?;
        self.authorize(name)?;

        let path = self.scripts_dir.join(name);
        tracing::info!(script = %name, "run_script execute");

        let mut cmd = if name.ends_with(".py") {
            let mut c = Command::new("python3");
            c.arg(&path);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg(&path);
            c
        };

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await
        .map_err(|_| format!("Script timed out after {}s", self.timeout_secs))?
        .map_err(|e| format!("Execution failed: {e}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(format!("Exit {:?}\nstderr: {}", output.status, stderr.trim()));
        }
        Ok(json!({"stdout": stdout.trim(), "stderr": stderr.trim()}))
    }
}
