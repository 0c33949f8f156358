//! Write a location token for a file

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use watcher::{InodeTokenService, MonitorConfig, TokenService};

pub async fn run(config: &MonitorConfig, path: &Path, output: &Path) -> Result<()> {
    let tokens = InodeTokenService::new(config.token_search_depth);
    let token = tokens
        .create_token(path)
        .with_context(|| format!("Failed to create location token for {}", path.display()))?;

    util::write_token(output, &token)?;

    println!(
        "{} token for {} written to {}",
        "✓".green(),
        path.display().to_string().cyan(),
        output.display()
    );
    Ok(())
}
