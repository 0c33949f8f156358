//! Watch a file and report changes until interrupted

use crate::util;
use anyhow::{Context, Result};
use chrono::{Local, Utc};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use watcher::{FileMonitor, LocationToken, MonitorBuilder, MonitorConfig, MonitorStatus};

/// What to start monitoring from
pub enum Source {
    Path(PathBuf),
    Token(PathBuf),
}

/// Notifications forwarded from the monitor's worker
enum Notice {
    Changed,
    Failed(String),
}

pub async fn run(
    config: MonitorConfig,
    source: Source,
    json: bool,
    save_token: Option<PathBuf>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let error_tx = tx.clone();
    let builder = MonitorBuilder::new().config(config).on_error(move |e| {
        let _ = error_tx.send(Notice::Failed(e.to_string()));
    });
    let callback = move || {
        let _ = tx.send(Notice::Changed);
    };

    let monitor = match source {
        Source::Path(path) => builder
            .watch(&path, callback)
            .with_context(|| format!("Failed to watch {}", path.display()))?,
        Source::Token(token_file) => {
            let token = util::read_token(&token_file)?;
            builder
                .watch_token(token, callback)
                .with_context(|| format!("Failed to resume from token in {}", token_file.display()))?
        }
    };

    if monitor.status() == MonitorStatus::Dormant {
        anyhow::bail!("Could not start watching {}", monitor.target_path().display());
    }

    let mut saved = None;
    if let Some(path) = &save_token {
        saved = persist_token(&monitor, path, None)?;
    }

    if !json {
        println!(
            "Watching {} {}",
            monitor.target_path().display().to_string().cyan(),
            "(Ctrl-C to stop)".dimmed()
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break;
            }
            notice = rx.recv() => {
                let Some(notice) = notice else { break };
                match notice {
                    Notice::Changed => print_change(&monitor, json)?,
                    Notice::Failed(message) => print_failure(&monitor, &message, json)?,
                }
                if let Some(path) = &save_token {
                    saved = persist_token(&monitor, path, saved)?;
                }
            }
        }
    }

    monitor.stop();
    Ok(())
}

/// Write the monitor's token if it differs from what was last saved
fn persist_token(
    monitor: &FileMonitor,
    path: &Path,
    saved: Option<LocationToken>,
) -> Result<Option<LocationToken>> {
    match monitor.location_token() {
        Some(token) if saved.as_ref() != Some(&token) => {
            util::write_token(path, &token)?;
            debug!("Saved location token to {}", path.display());
            Ok(Some(token))
        }
        Some(_) => Ok(saved),
        None => {
            warn!("No location token held, {} not updated", path.display());
            Ok(saved)
        }
    }
}

fn print_change(monitor: &FileMonitor, json: bool) -> Result<()> {
    let path = monitor.target_path();

    if json {
        let line = serde_json::json!({
            "event": "changed",
            "path": path,
            "timestamp": util::format_utc_time(Utc::now()),
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!(
            "{}  {} {}",
            util::format_local_time(Local::now()).dimmed(),
            "changed".green(),
            path.display()
        );
    }
    Ok(())
}

fn print_failure(monitor: &FileMonitor, message: &str, json: bool) -> Result<()> {
    let dormant = monitor.status() == MonitorStatus::Dormant;

    if json {
        let line = serde_json::json!({
            "event": "error",
            "path": monitor.target_path(),
            "message": message,
            "dormant": dormant,
            "timestamp": util::format_utc_time(Utc::now()),
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!(
            "{}  {} {}",
            util::format_local_time(Local::now()).dimmed(),
            "error".red(),
            message
        );
        if dormant {
            println!("  {}", "Monitor is dormant; the file could not be followed".yellow());
        }
    }
    Ok(())
}
