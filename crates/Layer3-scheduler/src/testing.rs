//! Scripted collaborators for tests
//!
//! `ScriptedModel` answers `complete` calls from a queue of canned replies;
//! `CountingWorker` returns a fixed result and records which subtasks reached
//! it.

use crate::task::Task;
use crate::worker::{Worker, WorkerResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use warden_foundation::{CompletionOptions, Error, Message, Principal, ReasoningModel, Result};

// ============================================================================
// ScriptedModel
// ============================================================================

/// One recorded `complete` call
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
}

#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<ModelCall>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn then_reply(self, reply: impl Into<String>) -> Self {
        self.replies.lock().push_back(Ok(reply.into()));
        self
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.replies.lock().push_back(Err(Error::Model(message.into())));
        self
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ReasoningModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<Message> {
        self.calls.lock().push(ModelCall {
            messages: messages.to_vec(),
            options: options.clone(),
        });

        let next = self.replies.lock().pop_front();
        match next {
            Some(Ok(content)) => Ok(Message::assistant(content)),
            Some(Err(e)) => Err(e),
            None => Err(Error::Model("script exhausted".to_string())),
        }
    }
}

// ============================================================================
// CountingWorker
// ============================================================================

pub struct CountingWorker {
    role: String,
    description: String,
    result: WorkerResult,
    delay: Duration,
    seen: Mutex<Vec<String>>,
}

impl CountingWorker {
    pub fn succeeding(role: &str) -> Self {
        Self::new(role, WorkerResult::success(format!("{} done", role)))
    }

    pub fn failing(role: &str) -> Self {
        Self::new(role, WorkerResult::failure(format!("{} failed", role)))
    }

    pub fn new(role: &str, result: WorkerResult) -> Self {
        Self {
            role: role.to_string(),
            description: format!("Handles {} subtasks", role),
            result,
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    /// Plan ids of the subtasks this worker executed, in call order
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Worker for CountingWorker {
    fn role(&self) -> &str {
        &self.role
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute_task(&self, task: &Task, _principal: &Principal) -> Result<WorkerResult> {
        self.seen.lock().push(task.title.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.result.clone())
    }
}
