//! Process context
//!
//! Built once at startup and handed explicitly to the controller and the
//! workers. Owns storage, the audit sink, the security gate, the sandbox
//! manager and the tool registry.

use crate::controller::Controller;
use crate::model_worker::ModelWorker;
use crate::store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
use crate::tools::ToolRegistry;
use crate::worker::WorkerRegistry;
use std::sync::Arc;
use tracing::info;
use warden_foundation::{
    AuditLogger, AuditLoggerConfig, AuditSink, MemoryAuditLog, ReasoningModel, Result, Storage,
    WardenConfig,
};
use warden_gate::{OwnershipResolver, SecurityGate};
use warden_sandbox::{CodeExecutionTool, ExecutionManager, IsolationRuntime};

const AUDIT_DB_FILE: &str = "audit.db";

pub struct WardenContext {
    config: WardenConfig,
    storage: Option<Storage>,
    audit: Arc<dyn AuditSink>,
    gate: Arc<SecurityGate>,
    sandbox: Arc<ExecutionManager>,
    tools: Arc<ToolRegistry>,
    tasks: Arc<dyn TaskStore>,
}

impl WardenContext {
    /// SQLite storage and audit log under `config.storage.data_dir()`
    pub fn open(
        config: WardenConfig,
        runtime: Arc<dyn IsolationRuntime>,
        ownership: Arc<dyn OwnershipResolver>,
    ) -> Result<Self> {
        let data_dir = config.storage.data_dir();
        let storage = Storage::new(&data_dir)?;
        let audit: Arc<dyn AuditSink> = Arc::new(AuditLogger::with_config(AuditLoggerConfig {
            db_path: data_dir.join(AUDIT_DB_FILE),
            ..Default::default()
        })?);

        let gate = SecurityGate::with_storage(&config, storage.clone(), ownership)?
            .with_audit(audit.clone());
        let sandbox = ExecutionManager::new(runtime, config.sandbox.clone())
            .with_audit(audit.clone())
            .with_storage(storage.clone());
        let tasks: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(storage.clone()));

        info!(data_dir = %data_dir.display(), "Warden context opened");
        Ok(Self::assemble(config, Some(storage), audit, gate, sandbox, tasks))
    }

    /// Nothing touches disk except sandbox scratch directories
    pub fn in_memory(config: WardenConfig, runtime: Arc<dyn IsolationRuntime>) -> Result<Self> {
        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditLog::new());
        let gate = SecurityGate::in_memory(&config)?.with_audit(audit.clone());
        let sandbox =
            ExecutionManager::new(runtime, config.sandbox.clone()).with_audit(audit.clone());

        Ok(Self::assemble(
            config,
            None,
            audit,
            gate,
            sandbox,
            Arc::new(MemoryTaskStore::new()),
        ))
    }

    fn assemble(
        config: WardenConfig,
        storage: Option<Storage>,
        audit: Arc<dyn AuditSink>,
        gate: SecurityGate,
        sandbox: ExecutionManager,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        let sandbox = Arc::new(sandbox);
        let tools = ToolRegistry::new().with_tool(Arc::new(CodeExecutionTool::new(sandbox.clone())));

        Self {
            config,
            storage,
            audit,
            gate: Arc::new(gate),
            sandbox,
            tools: Arc::new(tools),
            tasks,
        }
    }

    /// Replace the tool registry (the code execution tool is not re-added)
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn gate(&self) -> &Arc<SecurityGate> {
        &self.gate
    }

    pub fn sandbox(&self) -> &Arc<ExecutionManager> {
        &self.sandbox
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    /// One `ModelWorker` per role in `scheduler.workerPrompts`
    pub fn model_workers(&self, model: Arc<dyn ReasoningModel>) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        for (role, prompt) in &self.config.scheduler.worker_prompts {
            registry.register(Arc::new(
                ModelWorker::new(
                    role.as_str(),
                    prompt.as_str(),
                    model.clone(),
                    self.gate.clone(),
                    self.tools.clone(),
                )
                .with_temperature(self.config.scheduler.temperature),
            ));
        }
        registry
    }

    pub fn controller(&self, model: Arc<dyn ReasoningModel>, workers: WorkerRegistry) -> Controller {
        Controller::new(
            model,
            workers,
            self.tasks.clone(),
            self.config.scheduler.clone(),
        )
        .with_audit(self.audit.clone())
    }
}
