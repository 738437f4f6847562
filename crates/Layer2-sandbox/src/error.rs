//! Sandbox errors
//!
//! Never escape `ExecutionManager::execute`; they are folded into an
//! unsuccessful `ExecutionResult` there.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Isolation runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Runtime {op} failed: {message}")]
    Runtime { op: &'static str, message: String },

    #[error("Scratch directory error: {0}")]
    Scratch(#[from] std::io::Error),
}

impl SandboxError {
    pub fn runtime(op: &'static str, message: impl ToString) -> Self {
        Self::Runtime {
            op,
            message: message.to_string(),
        }
    }
}

impl From<SandboxError> for warden_foundation::Error {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::UnsupportedLanguage(lang) => Self::UnsupportedLanguage(lang),
            other => Self::infrastructure("-", other.to_string()),
        }
    }
}
