//! Model-backed worker
//!
//! Prompts the reasoning model with the role's system prompt and expects one
//! JSON reply:
//!
//! ```json
//! {"success": true, "message": "...", "data": {...},
//!  "tool_calls": [{"tool": "code_execution", "params": {...}}]}
//! ```
//!
//! Every tool call goes through `SecurityGate::invoke_tool` on behalf of the
//! task owner. Tool results are folded into `data`; a denied or failing call
//! turns the subtask into a failure. Prompt and reply are charged to the
//! owner's `token_usage` quota; an exhausted quota fails the subtask before
//! the model is called.

use crate::plan::extract_json;
use crate::task::Task;
use crate::tools::ToolRegistry;
use crate::worker::{Worker, WorkerResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_foundation::{
    estimate_tokens, CompletionOptions, LimitType, Message, Principal, ReasoningModel, Result,
};
use warden_gate::SecurityGate;

const REPLY_INSTRUCTIONS: &str = r#"## Reply format
Reply with a single JSON object:
{"success": true|false, "message": "what you did", "data": <optional JSON>,
 "tool_calls": [{"tool": "<tool id>", "params": {...}}]}
Only call tools from the provided list."#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkerReply {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default, alias = "tool_calls")]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(alias = "id", alias = "name")]
    tool: String,
    #[serde(default, alias = "arguments", alias = "input")]
    params: Value,
}

pub struct ModelWorker {
    role: String,
    description: String,
    system_prompt: String,
    model: Arc<dyn ReasoningModel>,
    gate: Arc<SecurityGate>,
    tools: Arc<ToolRegistry>,
    temperature: f32,
}

impl ModelWorker {
    pub fn new(
        role: impl Into<String>,
        system_prompt: impl Into<String>,
        model: Arc<dyn ReasoningModel>,
        gate: Arc<SecurityGate>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            role: role.into(),
            description: first_sentence(&system_prompt).to_string(),
            system_prompt,
            model,
            gate,
            tools,
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Defaults to the first sentence of the system prompt
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    async fn charge_tokens(
        &self,
        principal: &Principal,
        options: &CompletionOptions,
        messages: &[Message],
        reply: &Message,
    ) {
        let prompt = options.system_prompt.as_deref().map_or(0, estimate_tokens);
        let tokens = messages
            .iter()
            .chain(std::iter::once(reply))
            .map(|m| estimate_tokens(&m.content))
            .sum::<u64>()
            + prompt;
        if !self
            .gate
            .record_cost(principal, LimitType::TokenUsage, tokens)
            .await
        {
            warn!(role = %self.role, user = %principal.id, tokens, "Token charge not recorded");
        }
    }

    async fn run_tool_call(&self, principal: &Principal, call: ToolCall) -> (bool, Value) {
        let Some(tool) = self.tools.get(&call.tool) else {
            warn!(role = %self.role, tool = %call.tool, "Worker requested unknown tool");
            return (
                false,
                json!({"tool": call.tool, "error": format!("Unknown tool: {}", call.tool)}),
            );
        };

        match self.gate.invoke_tool(principal, tool.as_ref(), call.params).await {
            Ok(output) => (
                !output.is_error,
                json!({
                    "tool": call.tool,
                    "isError": output.is_error,
                    "content": output.content,
                    "metadata": output.metadata,
                }),
            ),
            Err(e) => {
                info!(
                    role = %self.role,
                    tool = %call.tool,
                    user = %principal.id,
                    error = %e,
                    "Tool call rejected"
                );
                (false, json!({"tool": call.tool, "error": e.to_string()}))
            }
        }
    }
}

#[async_trait]
impl Worker for ModelWorker {
    fn role(&self) -> &str {
        &self.role
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute_task(&self, task: &Task, principal: &Principal) -> Result<WorkerResult> {
        let options = CompletionOptions::default()
            .with_system_prompt(format!("{}\n\n{}", self.system_prompt, REPLY_INSTRUCTIONS))
            .with_tools(self.tools.descriptors())
            .with_temperature(self.temperature);
        let messages = [Message::user(task.description.clone())];

        if !self
            .gate
            .limiter()
            .is_allowed(principal, LimitType::TokenUsage, 1, None)?
        {
            warn!(role = %self.role, task_id = %task.id, user = %principal.id, "Token quota exhausted");
            return Ok(WorkerResult::failure(format!(
                "{} quota exhausted",
                LimitType::TokenUsage.as_str()
            )));
        }

        let reply = self.model.complete(&messages, &options).await?;
        self.charge_tokens(principal, &options, &messages, &reply).await;

        let parsed = extract_json(&reply.content)
            .ok_or_else(|| "no JSON object in reply".to_string())
            .and_then(|json| {
                serde_json::from_str::<WorkerReply>(json).map_err(|e| e.to_string())
            });
        let reply_data = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(role = %self.role, task_id = %task.id, error = %e, "Unparseable worker reply");
                return Ok(WorkerResult::failure(format!("Unparseable worker reply: {}", e))
                    .with_data(json!({"raw": reply.content})));
            }
        };

        debug!(
            role = %self.role,
            task_id = %task.id,
            tool_calls = reply_data.tool_calls.len(),
            "Worker replied"
        );

        if reply_data.tool_calls.is_empty() {
            return Ok(WorkerResult {
                success: reply_data.success,
                message: reply_data.message,
                data: reply_data.data,
            });
        }

        let mut tools_ok = true;
        let mut tool_results = Vec::with_capacity(reply_data.tool_calls.len());
        for call in reply_data.tool_calls {
            let (ok, result) = self.run_tool_call(principal, call).await;
            tools_ok &= ok;
            tool_results.push(result);
        }

        let message = if reply_data.success && !tools_ok {
            format!("{} (a tool call failed)", reply_data.message)
        } else {
            reply_data.message
        };

        Ok(WorkerResult {
            success: reply_data.success && tools_ok,
            message,
            data: Some(json!({
                "result": reply_data.data,
                "toolResults": tool_results,
            })),
        })
    }
}

fn first_sentence(text: &str) -> &str {
    let line = text.lines().next().unwrap_or("").trim();
    match line.find(". ") {
        Some(end) => &line[..=end],
        None => line,
    }
}
