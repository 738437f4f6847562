//! SQLite Storage for runtime data
//!
//! - Permissions: explicit per-user grants and role-default grants
//! - Rate-limit counters: fixed-window usage per (principal, limit type, resource)
//! - Moderation log: content filter verdicts
//! - Execution results: sandbox outcomes keyed by execution id
//! - Tasks: root tasks and their subtasks
//!
//! Configuration lives in JSON (storage/json/), audit entries in their own
//! database (audit/).
//!
//! ## Migration System
//!
//! - Version 1: Initial schema
//! - Version 2: `language` / `principal_id` on execution results, task owner index

use crate::core::{
    CategoryScore, ExecutionResult, LimitType, Permission, PermissionLevel, ResourceRef,
    ResourceType, RoleGrant,
};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

const DB_FILE: &str = "warden.db";

/// Storage service for persisting runtime data
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) `warden.db` under `data_dir`
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

        let db_path = data_dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // WAL so concurrent readers do not block the counter writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        info!(path = %db_path.display(), "Storage opened");
        Ok(storage)
    }

    /// Create an in-memory storage (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        Ok(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// Initialize database schema (base tables)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS permissions (
                principal_id TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                level TEXT NOT NULL CHECK(level IN ('none', 'read', 'execute', 'write', 'admin')),
                granted_at TEXT NOT NULL,
                PRIMARY KEY (principal_id, resource_type, resource_id)
            );

            CREATE TABLE IF NOT EXISTS role_grants (
                role TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                level TEXT NOT NULL CHECK(level IN ('none', 'read', 'execute', 'write', 'admin')),
                PRIMARY KEY (role, resource_type, resource_id)
            );

            CREATE TABLE IF NOT EXISTS rate_limit_counters (
                principal_id TEXT NOT NULL,
                limit_type TEXT NOT NULL,
                resource_id TEXT NOT NULL DEFAULT '',
                count INTEGER NOT NULL,
                window_expiry TEXT NOT NULL,
                PRIMARY KEY (principal_id, limit_type, resource_id)
            );

            CREATE TABLE IF NOT EXISTS moderation_log (
                id TEXT PRIMARY KEY,
                principal_id TEXT,
                is_allowed INTEGER NOT NULL,
                categories TEXT NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_moderation_principal
                ON moderation_log(principal_id, created_at);

            CREATE TABLE IF NOT EXISTS execution_results (
                execution_id TEXT PRIMARY KEY,
                success INTEGER NOT NULL,
                output TEXT NOT NULL,
                error TEXT,
                execution_time_ms INTEGER NOT NULL,
                resource_usage TEXT,
                failure TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                owner TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                dependencies TEXT NOT NULL,
                subtasks TEXT NOT NULL,
                assigned_role TEXT,
                result TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                FOREIGN KEY (parent_id) REFERENCES tasks(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);

            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run all pending migrations
    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.lock()?;

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    /// Migration to version 2: execution provenance and owner lookup
    fn migrate_v2(conn: &Connection) -> Result<()> {
        // Columns may already exist on a database created by a newer binary
        let _ = conn.execute("ALTER TABLE execution_results ADD COLUMN language TEXT", []);
        let _ = conn.execute(
            "ALTER TABLE execution_results ADD COLUMN principal_id TEXT",
            [],
        );

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner, created_at)",
            [],
        )
        .map_err(|e| Error::Storage(format!("Failed to create owner index: {}", e)))?;

        Ok(())
    }

    // ========================================================================
    // Permission Operations
    // ========================================================================

    /// Insert or replace an explicit grant
    pub fn upsert_permission(&self, permission: &Permission) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO permissions (principal_id, resource_type, resource_id, level, granted_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                permission.principal_id,
                permission.resource.resource_type.as_str(),
                permission.resource.resource_id,
                permission.level.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to save permission: {}", e)))?;

        Ok(())
    }

    /// Exact grant for `(principal, type, id)`
    pub fn get_permission(
        &self,
        principal_id: &str,
        resource: &ResourceRef,
    ) -> Result<Option<Permission>> {
        let conn = self.lock()?;

        let level: Option<String> = conn
            .query_row(
                r#"
                SELECT level FROM permissions
                WHERE principal_id = ?1 AND resource_type = ?2 AND resource_id = ?3
                "#,
                params![
                    principal_id,
                    resource.resource_type.as_str(),
                    resource.resource_id
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to get permission: {}", e)))?;

        level
            .map(|l| {
                Ok(Permission::new(
                    principal_id,
                    resource.clone(),
                    l.parse::<PermissionLevel>()?,
                ))
            })
            .transpose()
    }

    pub fn list_permissions(&self, principal_id: &str) -> Result<Vec<Permission>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT resource_type, resource_id, level FROM permissions
                WHERE principal_id = ?1 ORDER BY resource_type, resource_id
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![principal_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(|e| Error::Storage(format!("Failed to query permissions: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter()
            .map(|(rtype, rid, level)| {
                Ok(Permission::new(
                    principal_id,
                    ResourceRef::new(rtype.parse::<ResourceType>()?, rid),
                    level.parse::<PermissionLevel>()?,
                ))
            })
            .collect()
    }

    /// Returns whether a grant was removed
    pub fn revoke_permission(&self, principal_id: &str, resource: &ResourceRef) -> Result<bool> {
        let conn = self.lock()?;

        let deleted = conn
            .execute(
                r#"
                DELETE FROM permissions
                WHERE principal_id = ?1 AND resource_type = ?2 AND resource_id = ?3
                "#,
                params![
                    principal_id,
                    resource.resource_type.as_str(),
                    resource.resource_id
                ],
            )
            .map_err(|e| Error::Storage(format!("Failed to revoke permission: {}", e)))?;

        Ok(deleted > 0)
    }

    /// Replace every default grant of `role`
    pub fn set_role_grants(&self, role: &str, grants: &[RoleGrant]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        tx.execute("DELETE FROM role_grants WHERE role = ?1", params![role])
            .map_err(|e| Error::Storage(format!("Failed to clear role grants: {}", e)))?;

        for grant in grants {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO role_grants (role, resource_type, resource_id, level)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    role,
                    grant.resource.resource_type.as_str(),
                    grant.resource.resource_id,
                    grant.level.as_str(),
                ],
            )
            .map_err(|e| Error::Storage(format!("Failed to save role grant: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit role grants: {}", e)))
    }

    /// Role grants in insertion order; `None` when the role has no rows
    pub fn role_grants(&self, role: &str) -> Result<Option<Vec<RoleGrant>>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT resource_type, resource_id, level FROM role_grants WHERE role = ?1 ORDER BY rowid",
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows: Vec<(String, String, String)> = stmt
            .query_map(params![role], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(|e| Error::Storage(format!("Failed to query role grants: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        if rows.is_empty() {
            return Ok(None);
        }

        rows.into_iter()
            .map(|(rtype, rid, level)| {
                Ok(RoleGrant::new(
                    ResourceRef::new(rtype.parse::<ResourceType>()?, rid),
                    level.parse::<PermissionLevel>()?,
                ))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    // ========================================================================
    // Rate-limit Counter Operations
    // ========================================================================

    /// Fixed-window consume inside one immediate transaction.
    ///
    /// The window starts on the first consumption after the key is absent or
    /// expired. A rejected consumption leaves the row untouched.
    pub fn try_consume_counter(
        &self,
        key: &CounterKey,
        amount: u64,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        let existing = Self::read_counter(&tx, key)?;

        let (current, expiry) = match existing {
            Some(state) if state.window_expiry > now => (state.count, state.window_expiry),
            _ => (0, now + window),
        };

        let projected = current.saturating_add(amount);
        if projected > limit {
            return Ok(ConsumeOutcome {
                allowed: false,
                count: current,
                limit,
                window_expiry: expiry,
            });
        }

        tx.execute(
            r#"
            INSERT INTO rate_limit_counters (principal_id, limit_type, resource_id, count, window_expiry)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(principal_id, limit_type, resource_id)
            DO UPDATE SET count = excluded.count, window_expiry = excluded.window_expiry
            "#,
            params![
                key.principal_id,
                key.limit_type.as_str(),
                key.resource_column(),
                projected as i64,
                expiry.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to write counter: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit counter: {}", e)))?;

        Ok(ConsumeOutcome {
            allowed: true,
            count: projected,
            limit,
            window_expiry: expiry,
        })
    }

    /// Current counter state, `None` when absent or expired
    pub fn get_counter(&self, key: &CounterKey, now: DateTime<Utc>) -> Result<Option<CounterState>> {
        let conn = self.lock()?;
        Ok(Self::read_counter(&conn, key)?.filter(|s| s.window_expiry > now))
    }

    pub fn reset_counter(&self, key: &CounterKey) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            DELETE FROM rate_limit_counters
            WHERE principal_id = ?1 AND limit_type = ?2 AND resource_id = ?3
            "#,
            params![
                key.principal_id,
                key.limit_type.as_str(),
                key.resource_column()
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to reset counter: {}", e)))?;

        Ok(())
    }

    fn read_counter(conn: &Connection, key: &CounterKey) -> Result<Option<CounterState>> {
        let row: Option<(i64, String)> = conn
            .query_row(
                r#"
                SELECT count, window_expiry FROM rate_limit_counters
                WHERE principal_id = ?1 AND limit_type = ?2 AND resource_id = ?3
                "#,
                params![
                    key.principal_id,
                    key.limit_type.as_str(),
                    key.resource_column()
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to read counter: {}", e)))?;

        row.map(|(count, expiry)| {
            Ok(CounterState {
                count: count.max(0) as u64,
                window_expiry: parse_timestamp(&expiry)?,
            })
        })
        .transpose()
    }

    // ========================================================================
    // Moderation Log Operations
    // ========================================================================

    pub fn save_moderation(&self, record: &ModerationRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO moderation_log (id, principal_id, is_allowed, categories, reason, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.id,
                record.principal_id,
                record.is_allowed,
                serde_json::to_string(&record.categories)?,
                record.reason,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to save moderation record: {}", e)))?;

        Ok(())
    }

    pub fn get_moderation_log(&self, principal_id: &str, limit: u32) -> Result<Vec<ModerationRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, principal_id, is_allowed, categories, reason, created_at
                FROM moderation_log WHERE principal_id = ?1
                ORDER BY created_at DESC LIMIT ?2
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows: Vec<(String, Option<String>, bool, String, Option<String>, String)> = stmt
            .query_map(params![principal_id, limit], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })
            .map_err(|e| Error::Storage(format!("Failed to query moderation log: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter()
            .map(|(id, principal_id, is_allowed, categories, reason, created_at)| {
                Ok(ModerationRecord {
                    id,
                    principal_id,
                    is_allowed,
                    categories: serde_json::from_str(&categories)?,
                    reason,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    // ========================================================================
    // Execution Result Operations
    // ========================================================================

    pub fn save_execution_result(
        &self,
        result: &ExecutionResult,
        principal_id: Option<&str>,
        language: &str,
    ) -> Result<()> {
        let conn = self.lock()?;

        let usage = result
            .resource_usage
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let failure = result.failure.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO execution_results (
                execution_id, success, output, error, execution_time_ms,
                resource_usage, failure, created_at, language, principal_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                result.execution_id,
                result.success,
                result.output,
                result.error,
                result.execution_time_ms as i64,
                usage,
                failure,
                Utc::now().to_rfc3339(),
                language,
                principal_id,
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to save execution result: {}", e)))?;

        Ok(())
    }

    pub fn get_execution_result(&self, execution_id: &str) -> Result<Option<ExecutionResult>> {
        let conn = self.lock()?;

        let row: Option<(bool, String, Option<String>, i64, Option<String>, Option<String>)> = conn
            .query_row(
                r#"
                SELECT success, output, error, execution_time_ms, resource_usage, failure
                FROM execution_results WHERE execution_id = ?1
                "#,
                params![execution_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to get execution result: {}", e)))?;

        row.map(|(success, output, error, time_ms, usage, failure)| {
            Ok(ExecutionResult {
                execution_id: execution_id.to_string(),
                success,
                output,
                error,
                execution_time_ms: time_ms.max(0) as u64,
                resource_usage: usage.map(|u| serde_json::from_str(&u)).transpose()?,
                failure: failure.map(|f| serde_json::from_str(&f)).transpose()?,
            })
        })
        .transpose()
    }

    // ========================================================================
    // Task Operations
    // ========================================================================

    /// Insert or replace a task row
    pub fn save_task(&self, task: &TaskRecord) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT OR REPLACE INTO tasks (
                id, parent_id, owner, title, description, status, priority,
                dependencies, subtasks, assigned_role, result,
                created_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                task.id,
                task.parent_id,
                task.owner,
                task.title,
                task.description,
                task.status,
                task.priority,
                serde_json::to_string(&task.dependencies)?,
                serde_json::to_string(&task.subtasks)?,
                task.assigned_role,
                task.result.as_ref().map(serde_json::to_string).transpose()?,
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to save task: {}", e)))?;

        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                RawTaskRow::from_row,
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Failed to get task: {}", e)))?;

        row.map(RawTaskRow::into_record).transpose()
    }

    pub fn list_subtasks(&self, parent_id: &str) -> Result<Vec<TaskRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks WHERE parent_id = ?1 ORDER BY created_at, rowid",
                TASK_COLUMNS
            ))
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows: Vec<RawTaskRow> = stmt
            .query_map(params![parent_id], RawTaskRow::from_row)
            .map_err(|e| Error::Storage(format!("Failed to query subtasks: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter().map(RawTaskRow::into_record).collect()
    }

    /// Delete a task and its subtasks
    pub fn delete_task(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "DELETE FROM tasks WHERE id = ?1 OR parent_id = ?1",
            params![id],
        )
        .map_err(|e| Error::Storage(format!("Failed to delete task: {}", e)))?;

        Ok(())
    }
}

// ============================================================================
// Record types
// ============================================================================

/// Identifies one rate-limit counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterKey {
    pub principal_id: String,
    pub limit_type: LimitType,
    pub resource_id: Option<String>,
}

impl CounterKey {
    pub fn new(principal_id: impl Into<String>, limit_type: LimitType) -> Self {
        Self {
            principal_id: principal_id.into(),
            limit_type,
            resource_id: None,
        }
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    fn resource_column(&self) -> &str {
        self.resource_id.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterState {
    pub count: u64,
    pub window_expiry: DateTime<Utc>,
}

/// Result of an atomic check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeOutcome {
    pub allowed: bool,
    /// Count after the attempt (unchanged when rejected)
    pub count: u64,
    pub limit: u64,
    pub window_expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRecord {
    pub id: String,
    pub principal_id: Option<String>,
    pub is_allowed: bool,
    pub categories: Vec<CategoryScore>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Flat task row; status and priority are kept as their string forms so the
/// scheduler owns the enums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub parent_id: Option<String>,
    pub owner: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub dependencies: Vec<String>,
    pub subtasks: Vec<String>,
    pub assigned_role: Option<String>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

const TASK_COLUMNS: &str = "id, parent_id, owner, title, description, status, priority, \
     dependencies, subtasks, assigned_role, result, created_at, started_at, completed_at";

struct RawTaskRow {
    id: String,
    parent_id: Option<String>,
    owner: String,
    title: String,
    description: String,
    status: String,
    priority: String,
    dependencies: String,
    subtasks: String,
    assigned_role: Option<String>,
    result: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RawTaskRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            owner: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            status: row.get(5)?,
            priority: row.get(6)?,
            dependencies: row.get(7)?,
            subtasks: row.get(8)?,
            assigned_role: row.get(9)?,
            result: row.get(10)?,
            created_at: row.get(11)?,
            started_at: row.get(12)?,
            completed_at: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<TaskRecord> {
        Ok(TaskRecord {
            id: self.id,
            parent_id: self.parent_id,
            owner: self.owner,
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            dependencies: serde_json::from_str(&self.dependencies)?,
            subtasks: serde_json::from_str(&self.subtasks)?,
            assigned_role: self.assigned_role,
            result: self.result.map(|r| serde_json::from_str(&r)).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("Invalid timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentCategory, FailureKind, ResourceUsage};

    #[test]
    fn test_schema_version() {
        let storage = Storage::in_memory().expect("Failed to create storage");
        assert_eq!(storage.get_schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Storage::new(dir.path()).unwrap();
            storage
                .upsert_permission(&Permission::new(
                    "alice",
                    ResourceRef::new(ResourceType::Tool, "python"),
                    PermissionLevel::Execute,
                ))
                .unwrap();
        }
        let storage = Storage::new(dir.path()).unwrap();
        assert_eq!(storage.list_permissions("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_permission_round_trip() {
        let storage = Storage::in_memory().expect("Failed to create storage");
        let grant = Permission::new(
            "alice",
            ResourceRef::new(ResourceType::Workspace, "ws-42"),
            PermissionLevel::Write,
        );

        storage.upsert_permission(&grant).unwrap();
        let stored = storage
            .get_permission("alice", &grant.resource)
            .unwrap()
            .expect("grant not found");
        assert_eq!(stored, grant);

        // Upsert replaces the level
        let downgraded = Permission::new("alice", grant.resource.clone(), PermissionLevel::Read);
        storage.upsert_permission(&downgraded).unwrap();
        assert_eq!(storage.list_permissions("alice").unwrap(), vec![downgraded]);

        assert!(storage.revoke_permission("alice", &grant.resource).unwrap());
        assert!(storage.get_permission("alice", &grant.resource).unwrap().is_none());
    }

    #[test]
    fn test_role_grants_replace() {
        let storage = Storage::in_memory().unwrap();
        assert!(storage.role_grants("user").unwrap().is_none());

        let grants = vec![
            RoleGrant::new(ResourceRef::wildcard(ResourceType::Tool), PermissionLevel::Execute),
            RoleGrant::new(ResourceRef::own(ResourceType::File), PermissionLevel::Write),
        ];
        storage.set_role_grants("user", &grants).unwrap();
        assert_eq!(storage.role_grants("user").unwrap(), Some(grants));

        storage.set_role_grants("user", &[]).unwrap();
        assert!(storage.role_grants("user").unwrap().is_none());
    }

    #[test]
    fn test_counter_fixed_window() {
        let storage = Storage::in_memory().unwrap();
        let key = CounterKey::new("alice", LimitType::ToolUsage);
        let t0 = Utc::now();
        let window = Duration::seconds(60);

        let first = storage.try_consume_counter(&key, 1, 2, window, t0).unwrap();
        assert!(first.allowed);
        assert_eq!(first.count, 1);
        assert_eq!(first.window_expiry, t0 + window);

        // A later consume keeps the original expiry
        let t1 = t0 + Duration::seconds(10);
        let second = storage.try_consume_counter(&key, 1, 2, window, t1).unwrap();
        assert!(second.allowed);
        assert_eq!(second.count, 2);
        assert_eq!(second.window_expiry, t0 + window);

        let third = storage.try_consume_counter(&key, 1, 2, window, t1).unwrap();
        assert!(!third.allowed);
        assert_eq!(storage.get_counter(&key, t1).unwrap().unwrap().count, 2);

        // Next window starts fresh
        let t2 = t0 + Duration::seconds(61);
        let fourth = storage.try_consume_counter(&key, 1, 2, window, t2).unwrap();
        assert!(fourth.allowed);
        assert_eq!(fourth.count, 1);
        assert_eq!(fourth.window_expiry, t2 + window);
    }

    #[test]
    fn test_counter_keys_are_independent() {
        let storage = Storage::in_memory().unwrap();
        let now = Utc::now();
        let window = Duration::seconds(60);
        let plain = CounterKey::new("alice", LimitType::Network);
        let scoped = CounterKey::new("alice", LimitType::Network).with_resource("api.example.com");

        storage.try_consume_counter(&plain, 1, 1, window, now).unwrap();
        assert!(storage.try_consume_counter(&scoped, 1, 1, window, now).unwrap().allowed);

        storage.reset_counter(&plain).unwrap();
        assert!(storage.get_counter(&plain, now).unwrap().is_none());
    }

    #[test]
    fn test_execution_result_round_trip() {
        let storage = Storage::in_memory().unwrap();

        let success = ExecutionResult::success("exec-1", "hello\n", 42).with_usage(ResourceUsage {
            memory_limit_bytes: Some(256 * 1024 * 1024),
            nano_cpus: Some(500_000_000),
            output_bytes: 6,
            output_truncated: false,
        });
        let failure = ExecutionResult::failure(
            "exec-2",
            FailureKind::NonZeroExit { code: 1 },
            "Process exited with code 1",
            7,
        )
        .with_output("Traceback ...");

        storage.save_execution_result(&success, Some("alice"), "python").unwrap();
        storage.save_execution_result(&failure, None, "bash").unwrap();

        assert_eq!(storage.get_execution_result("exec-1").unwrap(), Some(success));
        assert_eq!(storage.get_execution_result("exec-2").unwrap(), Some(failure));
        assert!(storage.get_execution_result("missing").unwrap().is_none());
    }

    #[test]
    fn test_moderation_log() {
        let storage = Storage::in_memory().unwrap();
        let record = ModerationRecord {
            id: "scan-1".into(),
            principal_id: Some("alice".into()),
            is_allowed: false,
            categories: vec![CategoryScore {
                category: ContentCategory::MaliciousCode,
                confidence: 0.9,
            }],
            reason: Some("malicious_code".into()),
            created_at: Utc::now(),
        };
        storage.save_moderation(&record).unwrap();

        let log = storage.get_moderation_log("alice", 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].categories, record.categories);
        assert!(!log[0].is_allowed);
    }

    #[test]
    fn test_task_tree() {
        let storage = Storage::in_memory().unwrap();
        let now = Utc::now();
        let root = TaskRecord {
            id: "root".into(),
            parent_id: None,
            owner: "alice".into(),
            title: "Write and test".into(),
            description: "write and test a function".into(),
            status: "in_progress".into(),
            priority: "medium".into(),
            dependencies: vec![],
            subtasks: vec!["a".into()],
            assigned_role: None,
            result: None,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
        };
        let child = TaskRecord {
            id: "a".into(),
            parent_id: Some("root".into()),
            subtasks: vec![],
            assigned_role: Some("coder".into()),
            result: Some(serde_json::json!({"success": true})),
            ..root.clone()
        };

        storage.save_task(&root).unwrap();
        storage.save_task(&child).unwrap();

        assert_eq!(storage.get_task("root").unwrap(), Some(root));
        assert_eq!(storage.list_subtasks("root").unwrap(), vec![child]);

        storage.delete_task("root").unwrap();
        assert!(storage.get_task("a").unwrap().is_none());
    }
}
