//! Show where a saved location token points

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use watcher::{InodeTokenService, MonitorConfig, ResolvedToken, TokenService};

pub async fn run(config: &MonitorConfig, token_file: &Path) -> Result<()> {
    let resolved = resolve_file(config, token_file)?;

    println!("Path:   {}", resolved.path.display().to_string().cyan());
    if resolved.is_stale {
        println!("Token:  {}", "Stale (file has moved)".yellow());
        println!(
            "  {}",
            format!("Tip: refresh with 'fmon token {} -o {}'", resolved.path.display(), token_file.display())
                .dimmed()
        );
    } else {
        println!("Token:  {}", "Current".green());
    }
    Ok(())
}

fn resolve_file(config: &MonitorConfig, token_file: &Path) -> Result<ResolvedToken> {
    let token = util::read_token(token_file)?;
    InodeTokenService::new(config.token_search_depth)
        .resolve(&token)
        .with_context(|| format!("Failed to resolve token in {}", token_file.display()))
}
