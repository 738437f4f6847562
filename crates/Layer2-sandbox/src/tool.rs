//! Code execution tool - the execution manager behind the Tool contract

use crate::manager::ExecutionManager;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use warden_foundation::{Capability, Result, Tool, ToolOutput};

pub const CODE_EXECUTION_TOOL_ID: &str = "code_execution";

/// Runs caller-supplied code in a fresh isolation unit.
///
/// Authorization happens in the gate before `execute`; the tool itself only
/// narrows the default profile (a request may lower the timeout, never raise it).
pub struct CodeExecutionTool {
    manager: Arc<ExecutionManager>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeExecutionParams {
    code: String,
    language: String,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl CodeExecutionTool {
    pub fn new(manager: Arc<ExecutionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn id(&self) -> &str {
        CODE_EXECUTION_TOOL_ID
    }

    fn description(&self) -> &str {
        "Execute python, javascript, typescript or bash code in an isolated sandbox \
         with no network access. Returns stdout and stderr."
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::CodeExecution]
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Source code to run" },
                "language": {
                    "type": "string",
                    "enum": ["python", "javascript", "typescript", "bash"]
                },
                "input": { "type": "string", "description": "Data piped to stdin" },
                "timeoutMs": {
                    "type": "integer",
                    "description": "Wall-clock limit; capped at the configured default"
                }
            },
            "required": ["code", "language"]
        })
    }

    async fn is_available(&self) -> bool {
        self.manager.is_available().await
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput> {
        let params: CodeExecutionParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid parameters: {}", e))),
        };

        let mut profile = self.manager.default_profile().clone();
        if let Some(requested) = params.timeout_ms {
            profile.timeout_ms = requested.min(profile.timeout_ms);
        }

        let result = self
            .manager
            .execute(
                &params.code,
                &params.language,
                params.input.as_deref(),
                Some(&profile),
            )
            .await;

        let metadata = serde_json::to_value(&result)?;
        let output = if result.success {
            ToolOutput::success(result.output)
        } else {
            let error = result.error.unwrap_or_default();
            let content = if result.output.is_empty() {
                error
            } else {
                format!("{}\n{}", error, result.output)
            };
            ToolOutput::error(content)
        };

        Ok(output.with_metadata(metadata))
    }
}
