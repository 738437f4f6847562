//! Error types for Warden
//!
//! Every crate in the workspace converts into this enum at its boundary.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Warden error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Security gate
    // ========================================================================
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Content blocked: {0}")]
    ContentBlocked(String),

    // ========================================================================
    // Sandbox
    // ========================================================================
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Sandbox infrastructure error (execution {execution_id}): {message}")]
    SandboxInfrastructure {
        execution_id: String,
        message: String,
    },

    #[error("Execution timed out after {0}ms")]
    ExecutionTimeout(u64),

    // ========================================================================
    // Scheduler
    // ========================================================================
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("No worker registered for role: {0}")]
    WorkerNotFound(String),

    #[error("Dependency failed: {0}")]
    DependencyFailed(String),

    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // Storage
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // External conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors a caller can show verbatim. Everything else is logged and
    /// surfaced as a generic failure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_)
                | Error::RateLimitExceeded(_)
                | Error::ContentBlocked(_)
                | Error::UnsupportedLanguage(_)
                | Error::ExecutionTimeout(_)
                | Error::PlanParse(_)
                | Error::WorkerNotFound(_)
                | Error::DependencyFailed(_)
                | Error::InvalidInput(_)
                | Error::NotFound(_)
                | Error::Cancelled
        )
    }

    /// Gate-level denial (as opposed to a failure while evaluating)
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_) | Error::RateLimitExceeded(_) | Error::ContentBlocked(_)
        )
    }

    pub fn infrastructure(execution_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SandboxInfrastructure {
            execution_id: execution_id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denials_are_user_facing() {
        let err = Error::RateLimitExceeded("tool_usage".into());
        assert!(err.is_denial());
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_infrastructure_is_not_user_facing() {
        let err = Error::infrastructure("abc", "docker socket closed");
        assert!(!err.is_user_facing());
        assert!(err.to_string().contains("abc"));
    }
}
