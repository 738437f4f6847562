//! Audit Logger - persistent and in-memory audit sinks

use super::types::{
    AuditCategory, AuditDecision, AuditEntry, AuditId, AuditQuery, AuditStatistics,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

// ============================================================================
// AuditSink
// ============================================================================

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> crate::Result<AuditId>;

    async fn query(&self, query: &AuditQuery) -> crate::Result<Vec<AuditEntry>>;

    async fn recent(&self, limit: usize) -> crate::Result<Vec<AuditEntry>> {
        self.query(&AuditQuery::new().with_limit(limit)).await
    }
}

// ============================================================================
// AuditLogger (SQLite)
// ============================================================================

#[derive(Debug, Clone)]
pub struct AuditLoggerConfig {
    pub db_path: PathBuf,
    /// Entries older than this are removed by `cleanup`
    pub retention_days: u32,
}

impl Default for AuditLoggerConfig {
    fn default() -> Self {
        let db_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("warden")
            .join("audit.db");

        Self {
            db_path,
            retention_days: 90,
        }
    }
}

/// SQLite-backed audit log
///
/// ```ignore
/// let logger = AuditLogger::new()?;
/// let entry = AuditEntry::new(AuditCategory::Sandbox, "python", AuditDecision::Success)
///     .with_correlation(execution_id);
/// logger.record(entry).await?;
/// ```
pub struct AuditLogger {
    db: Mutex<Connection>,
    config: AuditLoggerConfig,
}

impl AuditLogger {
    pub fn new() -> crate::Result<Self> {
        Self::with_config(AuditLoggerConfig::default())
    }

    pub fn with_config(config: AuditLoggerConfig) -> crate::Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&config.db_path)?;
        Self::init_tables(&conn)?;

        info!(
            db_path = %config.db_path.display(),
            "Audit logger initialized"
        );

        Ok(Self {
            db: Mutex::new(conn),
            config,
        })
    }

    /// In-memory logger (tests, dry runs)
    pub fn in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;

        Ok(Self {
            db: Mutex::new(conn),
            config: AuditLoggerConfig {
                db_path: PathBuf::from(":memory:"),
                ..Default::default()
            },
        })
    }

    fn init_tables(db: &Connection) -> crate::Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                principal TEXT,
                category TEXT NOT NULL,
                decision TEXT NOT NULL,
                reason TEXT,
                action TEXT NOT NULL,
                target TEXT,
                correlation_id TEXT,
                data TEXT NOT NULL,
                duration_ms INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_principal ON audit_log(principal);
            CREATE INDEX IF NOT EXISTS idx_audit_correlation ON audit_log(correlation_id);
            "#,
        )?;
        Ok(())
    }

    pub async fn get(&self, id: &AuditId) -> crate::Result<Option<AuditEntry>> {
        let db = self.db.lock().await;

        let entry = db
            .query_row(
                "SELECT * FROM audit_log WHERE id = ?1",
                params![id.0],
                Self::row_to_entry,
            )
            .optional()?;

        Ok(entry)
    }

    pub async fn statistics(&self) -> crate::Result<AuditStatistics> {
        let db = self.db.lock().await;

        let total_entries: u64 =
            db.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;

        let mut by_category = HashMap::new();
        let mut stmt = db.prepare("SELECT category, COUNT(*) FROM audit_log GROUP BY category")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            by_category.insert(row.get::<_, String>(0)?, row.get::<_, u64>(1)?);
        }

        let mut by_decision = HashMap::new();
        let mut stmt = db.prepare("SELECT decision, COUNT(*) FROM audit_log GROUP BY decision")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            by_decision.insert(row.get::<_, String>(0)?, row.get::<_, u64>(1)?);
        }

        Ok(AuditStatistics {
            total_entries,
            by_category,
            by_decision,
        })
    }

    /// Remove entries older than the configured retention
    pub async fn cleanup(&self) -> crate::Result<u64> {
        let db = self.db.lock().await;

        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.retention_days as i64);
        let deleted = db.execute(
            "DELETE FROM audit_log WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;

        if deleted > 0 {
            info!(
                deleted = deleted,
                days = self.config.retention_days,
                "Cleaned up old audit entries"
            );
        }

        Ok(deleted as u64)
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<AuditEntry> {
        let id: String = row.get("id")?;
        let timestamp: String = row.get("timestamp")?;
        let category: String = row.get("category")?;
        let decision: String = row.get("decision")?;
        let data: String = row.get("data")?;

        Ok(AuditEntry {
            id: AuditId(id),
            timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
            principal: row.get("principal")?,
            category: AuditCategory::parse(&category).unwrap_or(AuditCategory::Authorization),
            decision: AuditDecision::parse(&decision).unwrap_or(AuditDecision::Error),
            reason: row.get("reason")?,
            action: row.get("action")?,
            target: row.get("target")?,
            correlation_id: row.get("correlation_id")?,
            data: serde_json::from_str(&data).unwrap_or(Value::Null),
            duration_ms: row.get("duration_ms")?,
        })
    }
}

#[async_trait]
impl AuditSink for AuditLogger {
    async fn record(&self, entry: AuditEntry) -> crate::Result<AuditId> {
        let db = self.db.lock().await;

        let id = entry.id.clone();
        let data = serde_json::to_string(&entry.data)?;

        db.execute(
            r#"
            INSERT INTO audit_log (
                id, timestamp, principal, category, decision, reason,
                action, target, correlation_id, data, duration_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                id.0,
                entry.timestamp.to_rfc3339(),
                entry.principal,
                entry.category.as_str(),
                entry.decision.as_str(),
                entry.reason,
                entry.action,
                entry.target,
                entry.correlation_id,
                data,
                entry.duration_ms,
            ],
        )?;

        debug!(
            audit_id = %id,
            category = entry.category.as_str(),
            decision = entry.decision.as_str(),
            "Audit entry recorded"
        );

        Ok(id)
    }

    async fn query(&self, query: &AuditQuery) -> crate::Result<Vec<AuditEntry>> {
        let db = self.db.lock().await;

        let mut sql = String::from("SELECT * FROM audit_log WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref principal) = query.principal {
            sql.push_str(" AND principal = ?");
            params_vec.push(Box::new(principal.clone()));
        }

        if let Some(ref categories) = query.categories {
            let placeholders: Vec<&str> = categories.iter().map(|_| "?").collect();
            sql.push_str(&format!(" AND category IN ({})", placeholders.join(", ")));
            for category in categories {
                params_vec.push(Box::new(category.as_str().to_string()));
            }
        }

        if let Some(ref decisions) = query.decisions {
            let placeholders: Vec<&str> = decisions.iter().map(|_| "?").collect();
            sql.push_str(&format!(" AND decision IN ({})", placeholders.join(", ")));
            for decision in decisions {
                params_vec.push(Box::new(decision.as_str().to_string()));
            }
        }

        if let Some(ref correlation_id) = query.correlation_id {
            sql.push_str(" AND correlation_id = ?");
            params_vec.push(Box::new(correlation_id.clone()));
        }

        if let Some(ref from) = query.from {
            sql.push_str(" AND timestamp >= ?");
            params_vec.push(Box::new(from.to_rfc3339()));
        }
        if let Some(ref to) = query.to {
            sql.push_str(" AND timestamp <= ?");
            params_vec.push(Box::new(to.to_rfc3339()));
        }

        sql.push_str(" ORDER BY timestamp DESC");

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let mut stmt = db.prepare(&sql)?;
        let entries = stmt
            .query_map(params_refs.as_slice(), Self::row_to_entry)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }
}

// ============================================================================
// MemoryAuditLog
// ============================================================================

/// Audit sink kept in process memory
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: parking_lot::RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot in insertion order
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, entry: AuditEntry) -> crate::Result<AuditId> {
        let id = entry.id.clone();
        self.entries.write().push(entry);
        Ok(id)
    }

    async fn query(&self, query: &AuditQuery) -> crate::Result<Vec<AuditEntry>> {
        let entries = self.entries.read();
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(entries
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn denied(principal: &str) -> AuditEntry {
        AuditEntry::new(
            AuditCategory::Authorization,
            "code_execution",
            AuditDecision::Denied,
        )
        .with_principal(principal)
        .with_reason("permission_denied")
    }

    #[tokio::test]
    async fn test_audit_logger_round_trip() {
        let logger = AuditLogger::in_memory().unwrap();

        let entry = AuditEntry::new(AuditCategory::Sandbox, "python", AuditDecision::Timeout)
            .with_principal("alice")
            .with_correlation("exec-1")
            .with_reason("execution_timeout")
            .with_data(json!({"timeoutMs": 100}))
            .with_duration(100);

        let id = logger.record(entry.clone()).await.unwrap();
        let stored = logger.get(&id).await.unwrap().unwrap();

        assert_eq!(stored.principal.as_deref(), Some("alice"));
        assert_eq!(stored.category, AuditCategory::Sandbox);
        assert_eq!(stored.decision, AuditDecision::Timeout);
        assert_eq!(stored.correlation_id.as_deref(), Some("exec-1"));
        assert_eq!(stored.data["timeoutMs"], 100);
        assert_eq!(stored.duration_ms, Some(100));
    }

    #[tokio::test]
    async fn test_audit_logger_query_filters() {
        let logger = AuditLogger::in_memory().unwrap();

        logger.record(denied("alice")).await.unwrap();
        logger.record(denied("bob")).await.unwrap();
        logger
            .record(
                AuditEntry::new(AuditCategory::Content, "scan", AuditDecision::Allowed)
                    .with_principal("alice"),
            )
            .await
            .unwrap();

        let alice = logger
            .query(&AuditQuery::new().with_principal("alice"))
            .await
            .unwrap();
        assert_eq!(alice.len(), 2);

        let denials = logger
            .query(&AuditQuery::new().with_decisions(vec![AuditDecision::Denied]))
            .await
            .unwrap();
        assert_eq!(denials.len(), 2);

        let stats = logger.statistics().await.unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_category.get("authorization"), Some(&2));
    }

    #[tokio::test]
    async fn test_memory_audit_log_recent_first() {
        let log = MemoryAuditLog::new();
        log.record(denied("a")).await.unwrap();
        log.record(denied("b")).await.unwrap();

        let recent = log.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].principal.as_deref(), Some("b"));
        assert_eq!(log.len(), 2);
    }
}
