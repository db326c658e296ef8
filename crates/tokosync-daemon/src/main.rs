//! Tokosync Daemon - Background synchronization service
//!
//! This binary runs the sync engine against the configured remotes and
//! offers a few one-shot maintenance commands:
//! - `run` (default): start a sync session and keep it alive until SIGINT
//!   or SIGTERM
//! - `status`: print local record counts and the restore guard state
//! - `mark-restored`: record that a local restore just completed, which
//!   suppresses inbound sync for the protection window
//! - `check-config`: validate the configuration file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tokosync_core::config::Config;

mod service;

use service::DaemonService;

#[derive(Debug, Parser)]
#[command(name = "tokosyncd", version, about = "Offline-first sync daemon for Tokosync")]
struct Cli {
    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the sync engine until stopped
    Run,
    /// Show local store and restore guard state
    Status,
    /// Record that a restore just completed
    MarkRestored,
    /// Validate the configuration file
    CheckConfig,
}

// ============================================================================
// Output
// ============================================================================

/// How one-shot commands print their result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Human,
    Json,
}

impl Output {
    fn from_flag(json: bool) -> Self {
        if json {
            Output::Json
        } else {
            Output::Human
        }
    }

    fn success(self, message: &str) {
        match self {
            Output::Human => println!("\u{2713} {message}"),
            Output::Json => println!("{}", serde_json::json!({"success": true, "message": message})),
        }
    }

    fn error(self, message: &str) {
        match self {
            Output::Human => eprintln!("\u{2717} Error: {message}"),
            Output::Json => eprintln!("{}", serde_json::json!({"success": false, "error": message})),
        }
    }

    /// Indented detail line; JSON output carries details in the report
    fn detail(self, message: &str) {
        if self == Output::Human {
            println!("  {message}");
        }
    }

    fn report(self, value: &serde_json::Value) {
        if self == Output::Json {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
        }
    }
}

// ============================================================================
// Configuration and tracing
// ============================================================================

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load_or_default(&Config::default_path())),
    }
}

/// Installs the global subscriber
///
/// `RUST_LOG` wins over `-v`, which wins over `logging.level`.
fn init_tracing(config: &Config, verbose: u8) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Commands
// ============================================================================

async fn run(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::open(config, shutdown).await?;
    service.run().await
}

async fn status(config: Config, out: Output) -> Result<()> {
    let service = DaemonService::open(config, CancellationToken::new()).await?;
    let report = service.status_report().await?;

    if out == Output::Json {
        out.report(&report);
        return Ok(());
    }

    out.success("Local store");
    out.detail(&format!("Database: {}", service.config().store.database.display()));
    out.detail(&format!(
        "Restore guard: {}",
        if report["restore_guard_active"] == true {
            "active"
        } else {
            "inactive"
        }
    ));
    if let Some(at) = report["last_restore"].as_str() {
        out.detail(&format!("Last restore: {at}"));
    }
    if let Some(counts) = report["collections"].as_object() {
        for (name, count) in counts {
            out.detail(&format!("{name:<14} {count}"));
        }
    }
    Ok(())
}

async fn mark_restored(config: Config, out: Output) -> Result<()> {
    let service = DaemonService::open(config, CancellationToken::new()).await?;
    let guard = service.restore_guard();
    let at = guard.mark_restored().await.context("Failed to save restore marker")?;

    if out == Output::Json {
        out.report(&serde_json::json!({
            "restored_at": at.to_rfc3339(),
            "window_secs": guard.window().num_seconds(),
        }));
    } else {
        out.success(&format!(
            "Restore recorded at {}; inbound sync paused for {}s",
            at.to_rfc3339(),
            guard.window().num_seconds()
        ));
    }
    Ok(())
}

fn check_config(config: &Config, out: Output) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        out.success("Configuration is valid");
        return Ok(());
    }
    for e in &errors {
        out.error(&e.to_string());
    }
    anyhow::bail!("{} configuration error(s)", errors.len())
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config, cli.verbose);

    let out = Output::from_flag(cli.json);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            check_config(&config, out)?;
            info!("Tokosync daemon starting (tokosyncd)");
            let result = run(config).await;
            match &result {
                Ok(()) => info!("Tokosync daemon shut down gracefully"),
                Err(e) => error!(error = %e, "Tokosync daemon exiting with error"),
            }
            result
        }
        Commands::Status => status(config, out).await,
        Commands::MarkRestored => mark_restored(config, out).await,
        Commands::CheckConfig => check_config(&config, out),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["tokosyncd"]);
        assert!(cli.command.is_none());
        assert!(!cli.json);
    }

    #[test]
    fn test_cli_parses_subcommands_and_globals() {
        let cli = Cli::parse_from(["tokosyncd", "status", "--json", "-vv"]);
        assert!(matches!(cli.command, Some(Commands::Status)));
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);

        let cli = Cli::parse_from(["tokosyncd", "--config", "/tmp/t.yaml", "mark-restored"]);
        assert!(matches!(cli.command, Some(Commands::MarkRestored)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.yaml")));
    }

    #[test]
    fn test_output_from_flag() {
        assert_eq!(Output::from_flag(true), Output::Json);
        assert_eq!(Output::from_flag(false), Output::Human);
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/tokosync/config.yaml");
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_check_config_rejects_zero_interval() {
        let mut config = Config::default();
        config.sync.pull_interval_secs = 0;
        assert!(check_config(&config, Output::Json).is_err());
        assert!(check_config(&Config::default(), Output::Json).is_ok());
    }
}
