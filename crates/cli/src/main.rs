//! File monitor CLI - fmon command

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use watcher::MonitorConfig;

mod cmd;
mod util;

/// fmon - Follow a single file across edits, moves and atomic saves
#[derive(Parser)]
#[command(name = "fmon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Monitor configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a file and print a line for every change
    Watch {
        /// File to watch
        #[arg(required_unless_present = "token")]
        path: Option<PathBuf>,

        /// Resume from a saved location token instead of a path
        #[arg(long, conflicts_with = "path")]
        token: Option<PathBuf>,

        /// Emit one JSON object per line
        #[arg(long)]
        json: bool,

        /// Keep the current location token in this file
        #[arg(long)]
        save_token: Option<PathBuf>,
    },
    /// Write a location token for a file
    Token {
        /// File to create the token for
        path: PathBuf,

        /// Where to write the token
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show where a saved location token points
    Resolve {
        /// Token file
        token: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(MonitorConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Watch { path, token, json, save_token } => {
            let source = match (path, token) {
                (_, Some(token)) => cmd::watch::Source::Token(token),
                (Some(path), None) => cmd::watch::Source::Path(path),
                (None, None) => anyhow::bail!("Either a path or --token is required"),
            };
            cmd::watch::run(config, source, json, save_token).await
        }
        Commands::Token { path, output } => cmd::token::run(&config, &path, &output).await,
        Commands::Resolve { token } => cmd::resolve::run(&config, &token).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_requires_path_or_token() {
        assert!(Cli::try_parse_from(["fmon", "watch"]).is_err());
        assert!(Cli::try_parse_from(["fmon", "watch", "notes.txt"]).is_ok());
        assert!(Cli::try_parse_from(["fmon", "watch", "--token", "notes.tok"]).is_ok());
        assert!(Cli::try_parse_from(["fmon", "watch", "notes.txt", "--token", "notes.tok"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["fmon", "resolve", "notes.tok", "--verbose", "--config", "fmon.toml"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("fmon.toml")));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(load_config(Some(&missing)).is_err());
        assert_eq!(load_config(None).unwrap(), MonitorConfig::default());
    }
}
