//! Supported languages
//!
//! Each language fixes a container image, the file the code is written to
//! and the command that runs it.

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mount point of the scratch directory inside the unit
pub const SANDBOX_MOUNT: &str = "/sandbox";

/// File name of the optional stdin payload
pub const INPUT_FILE: &str = "input";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Bash,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Self::Python,
        Self::JavaScript,
        Self::TypeScript,
        Self::Bash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Bash => "bash",
        }
    }

    pub fn default_image(&self) -> &'static str {
        match self {
            Self::Python => "python:3.12-alpine",
            Self::JavaScript => "node:20-alpine",
            Self::TypeScript => "denoland/deno:alpine",
            Self::Bash => "bash:5.2",
        }
    }

    pub fn source_file(&self) -> &'static str {
        match self {
            Self::Python => "main.py",
            Self::JavaScript => "main.js",
            Self::TypeScript => "main.ts",
            Self::Bash => "main.sh",
        }
    }

    /// Command that runs the source file from the scratch mount
    pub fn entry_command(&self) -> Vec<String> {
        let source = format!("{}/{}", SANDBOX_MOUNT, self.source_file());
        let argv: Vec<&str> = match self {
            Self::Python => vec!["python3", "-u", source.as_str()],
            Self::JavaScript => vec!["node", source.as_str()],
            Self::TypeScript => vec!["deno", "run", "--no-prompt", "--no-remote", source.as_str()],
            Self::Bash => vec!["bash", source.as_str()],
        };
        argv.into_iter().map(String::from).collect()
    }

    /// Entry command, with stdin redirected from the input file when present
    pub fn command(&self, with_input: bool) -> Vec<String> {
        let entry = self.entry_command();
        if !with_input {
            return entry;
        }
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "exec {} < {}/{}",
                entry.join(" "),
                SANDBOX_MOUNT,
                INPUT_FILE
            ),
        ]
    }

    /// Extra environment the runtime needs with a read-only root filesystem
    pub fn env(&self) -> Vec<String> {
        match self {
            Self::Python => vec!["PYTHONDONTWRITEBYTECODE=1".to_string()],
            Self::TypeScript => vec!["DENO_DIR=/tmp/deno".to_string()],
            Self::JavaScript | Self::Bash => vec![],
        }
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Self::Python),
            "javascript" | "js" | "node" => Ok(Self::JavaScript),
            "typescript" | "ts" => Ok(Self::TypeScript),
            "bash" | "sh" | "shell" => Ok(Self::Bash),
            _ => Err(SandboxError::UnsupportedLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
