//! Deepdive CLI: run iterative research passes over a conversation corpus.

mod clarify;
mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Deepdive: iterative research over issues, pull requests and discussions
#[derive(Parser, Debug)]
#[command(name = "deepdive", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Research a question and print the report
    Run(commands::RunArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write a default configuration to .deepdive/config.toml
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn,deepdive_core=info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "deepdive", "deepdive")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deepdive.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    match cli.command {
        Commands::Run(args) => commands::run(args, &workspace, cli.quiet).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&workspace),
            ConfigAction::Init => commands::config_init(&workspace),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepdive_core::PlanningMode;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "deepdive",
            "run",
            "why is CI slow",
            "--corpus",
            "acme/app",
            "--max-depth",
            "2",
            "--mode",
            "keyword",
            "--no-clarify",
            "--sequential",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.request, "why is CI slow");
        assert_eq!(args.corpus.as_deref(), Some("acme/app"));
        assert_eq!(args.max_depth, Some(2));
        assert_eq!(args.mode, Some(PlanningMode::Keyword));
        assert!(args.no_clarify);
        assert!(args.sequential);
    }

    #[test]
    fn test_answers_conflicts_with_no_clarify() {
        let result = Cli::try_parse_from([
            "deepdive",
            "run",
            "q",
            "--answers",
            "a.txt",
            "--no-clarify",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_config_subcommands() {
        let cli = Cli::try_parse_from(["deepdive", "config", "init", "-w", "/tmp"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init
            }
        ));
        assert_eq!(cli.workspace, PathBuf::from("/tmp"));
    }
}
