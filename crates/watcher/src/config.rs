//! Monitor configuration

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;

/// Tunables for [`FileMonitor`](crate::FileMonitor)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Pause length used by `pause_default()` (default: 1000ms)
    #[serde(default = "default_pause_ms")]
    pub default_pause_ms: u64,

    /// Directory levels searched when resolving a moved file (default: 2)
    #[serde(default = "default_token_search_depth")]
    pub token_search_depth: usize,

    /// Thread name of the default worker (default: "file-monitor")
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn default_pause(&self) -> Duration {
        Duration::from_millis(self.default_pause_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_pause_ms: default_pause_ms(),
            token_search_depth: default_token_search_depth(),
            worker_name: default_worker_name(),
        }
    }
}

fn default_pause_ms() -> u64 {
    1000
}

fn default_token_search_depth() -> usize {
    2
}

fn default_worker_name() -> String {
    "file-monitor".to_string()
}
