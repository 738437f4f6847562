//! Core Traits - collaborator interfaces
//!
//! Implemented in higher layers or by the embedding application:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Layer4-CLI                                                 │
//! │  └── wires concrete collaborators into WardenContext        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Layer3-Scheduler                                           │
//! │  └── ReasoningModel consumer (plan + synthesis + workers)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Layer2-Sandbox / Layer2-Gate                               │
//! │  ├── Tool implementations (code execution)                  │
//! │  └── Tool invocation through the security gate              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Layer1-Foundation (this layer)                             │
//! │  └── Tool, ReasoningModel, Clock                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Reasoning model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
        }
    }
}

/// Rough token count: four ASCII characters or two other characters per
/// token, rounded up. Used to charge `token_usage` when the model does not
/// report usage.
pub fn estimate_tokens(text: &str) -> u64 {
    let (ascii, other) = text.chars().fold((0u64, 0u64), |(a, o), c| {
        if c.is_ascii() {
            (a + 1, o)
        } else {
            (a, o + 1)
        }
    });
    ascii.div_ceil(4) + other.div_ceil(2)
}

/// Tool description offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub id: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            tools: Vec::new(),
            temperature: 0.2,
        }
    }
}

impl CompletionOptions {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Language model collaborator. Opaque: one call, one assistant message.
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<Message>;
}

// ============================================================================
// Tool
// ============================================================================

/// What a tool touches. The gate maps each capability to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CodeExecution,
    FileRead,
    FileWrite,
    Network,
    WorkspaceRead,
    WorkspaceWrite,
    UserDataRead,
    UserDataWrite,
    Deployment,
    ModelInference,
    Storage,
}

impl Capability {
    /// Tools with this capability run caller-supplied code, so their string
    /// parameters are screened before execution
    pub fn is_code_bearing(&self) -> bool {
        matches!(self, Self::CodeExecution)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Tool contract. Business logic lives in the implementor; authorization is
/// done by the gate before `execute` is reached.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique identifier, also the `tool` resource id
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn capabilities(&self) -> Vec<Capability>;

    /// JSON schema of `params`
    fn input_schema(&self) -> Value;

    async fn is_available(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            id: self.id().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("안녕"), 1);
    }
}
