//! Warden CLI - Main entry point

mod commands;

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_foundation::{Principal, Tier, WardenConfig};

/// Warden - sandboxed code execution behind a security gate
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run code in a fresh sandbox, through the security gate
    Exec(ExecArgs),
    /// Scan text with the content filter
    Scan {
        /// Text to scan (reads stdin when neither TEXT nor --file is given)
        text: Option<String>,
        /// Read the text from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Print the full verdict as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a command line against the default sandbox profile
    CheckCommand {
        command: String,
    },
    /// Check a file path against the default sandbox profile
    CheckPath {
        path: String,
    },
    /// Grant (or revoke) an explicit permission
    Grant {
        principal: String,
        /// Resource as type:id, e.g. tool:code_execution or workspace:*
        resource: String,
        /// none | read | execute | write | admin
        #[arg(required_unless_present = "revoke")]
        level: Option<String>,
        /// Remove the grant instead
        #[arg(long)]
        revoke: bool,
    },
    /// Show recent audit records
    Audit {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Inspect or initialize configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ClapArgs, Debug)]
pub struct ExecArgs {
    /// python | javascript | typescript | bash (inferred from --file)
    #[arg(short, long)]
    language: Option<String>,
    /// Source code
    #[arg(short, long, conflicts_with = "file")]
    code: Option<String>,
    /// Source file
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Data piped to the program's stdin
    #[arg(short, long)]
    input: Option<String>,
    /// Lower the configured timeout for this run
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[command(flatten)]
    principal: PrincipalArgs,
    /// Print the execution result as JSON
    #[arg(long)]
    json: bool,
}

/// Who the request is made for
#[derive(ClapArgs, Debug)]
pub struct PrincipalArgs {
    #[arg(long, default_value = "local")]
    user: String,
    #[arg(long = "role", default_value = "user")]
    roles: Vec<String>,
    /// free | basic | premium | enterprise
    #[arg(long, default_value = "free")]
    tier: String,
}

impl PrincipalArgs {
    fn principal(&self) -> anyhow::Result<Principal> {
        let tier: Tier = self.tier.parse()?;
        Ok(self
            .roles
            .iter()
            .fold(Principal::new(&self.user).with_tier(tier), |p, r| {
                p.with_role(r.as_str())
            }))
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the merged configuration
    Show,
    /// Write the default configuration
    Init {
        /// Write the global file instead of the project one
        #[arg(long)]
        global: bool,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print where configuration files are read from
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = WardenConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}", e);
        WardenConfig::default()
    });

    let ok = match args.command {
        Command::Exec(exec) => commands::exec(config, exec).await?,
        Command::Scan { text, file, json } => commands::scan(&config, text, file, json)?,
        Command::CheckCommand { command } => commands::check_command(&config, &command),
        Command::CheckPath { path } => commands::check_path(&config, &path),
        Command::Grant {
            principal,
            resource,
            level,
            revoke,
        } => commands::grant(&config, &principal, &resource, level.as_deref(), revoke)?,
        Command::Audit { limit } => commands::audit(&config, limit).await?,
        Command::Config { action } => commands::config(&config, action)?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_args() {
        let args = Args::try_parse_from([
            "warden", "exec", "-l", "python", "-c", "print(1)", "--role", "user", "--role",
            "developer", "--tier", "premium",
        ])
        .unwrap();

        let Command::Exec(exec) = args.command else {
            panic!("expected exec");
        };
        let principal = exec.principal.principal().unwrap();
        assert_eq!(principal.id, "local");
        assert_eq!(principal.tier, Tier::Premium);
        assert_eq!(principal.roles, vec!["user", "developer"]);
    }

    #[test]
    fn test_code_and_file_conflict() {
        assert!(Args::try_parse_from([
            "warden", "exec", "-c", "print(1)", "-f", "main.py"
        ])
        .is_err());
    }

    #[test]
    fn test_grant_requires_level_unless_revoking() {
        assert!(Args::try_parse_from(["warden", "grant", "alice", "tool:code_execution"]).is_err());
        assert!(
            Args::try_parse_from(["warden", "grant", "alice", "tool:code_execution", "--revoke"])
                .is_ok()
        );
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let args = PrincipalArgs {
            user: "u".into(),
            roles: vec![],
            tier: "platinum".into(),
        };
        assert!(args.principal().is_err());
    }
}
