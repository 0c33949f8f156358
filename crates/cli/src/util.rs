//! Shared helpers for CLI commands

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use std::path::Path;
use watcher::LocationToken;

/// Read a location token saved by `fmon token` or `--save-token`
pub fn read_token(path: &Path) -> Result<LocationToken> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read token file {}", path.display()))?;
    anyhow::ensure!(!bytes.is_empty(), "Token file {} is empty", path.display());
    Ok(LocationToken::from_bytes(bytes))
}

/// Write a token atomically (temp file + rename)
pub fn write_token(path: &Path, token: &LocationToken) -> Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");

    std::fs::write(&staging, token.as_bytes())
        .with_context(|| format!("Failed to write token file {}", path.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to move token into place at {}", path.display()))?;
    Ok(())
}

/// Wall-clock time for human-readable output
pub fn format_local_time(ts: DateTime<Local>) -> String {
    ts.format("%H:%M:%S%.3f").to_string()
}

/// RFC 3339 timestamp for JSON output
pub fn format_utc_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_token_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.tok");
        let token = LocationToken::from_bytes(vec![7, 1, 2, 3]);

        write_token(&path, &token).unwrap();
        assert_eq!(read_token(&path).unwrap(), token);

        // No staging file left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_empty_token_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.tok");
        std::fs::write(&path, b"").unwrap();

        assert!(read_token(&path).is_err());
    }

    #[test]
    fn test_utc_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(format_utc_time(ts), "2024-03-09T14:05:07.000Z");
    }
}
