use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::policy::ShellPolicy;

pub const APP_DIR_NAME: &str = "ProcGuard";
const CONFIG_FILE: &str = "agent.json";

const DATA_DIR_ENV: &str = "PROCGUARD_DATA_DIR";
const CACHE_DIR_ENV: &str = "PROCGUARD_CACHE_DIR";

/// Poll cadences of the background loops, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Intervals {
    pub process_ms: u64,
    pub screen_time_ms: u64,
    pub screen_time_flush_ms: u64,
    pub enforce_ms: u64,
    pub web_blocklist_poll_ms: u64,
    pub heartbeat_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            process_ms: 2_000,
            screen_time_ms: 1_000,
            screen_time_flush_ms: 10_000,
            enforce_ms: 2_000,
            web_blocklist_poll_ms: 500,
            heartbeat_ms: 2_000,
            shutdown_grace_ms: 1_000,
        }
    }
}

impl Intervals {
    pub fn process(&self) -> Duration {
        Duration::from_millis(self.process_ms.max(1))
    }

    pub fn screen_time(&self) -> Duration {
        Duration::from_millis(self.screen_time_ms.max(1))
    }

    pub fn screen_time_flush(&self) -> Duration {
        Duration::from_millis(self.screen_time_flush_ms)
    }

    pub fn enforce(&self) -> Duration {
        Duration::from_millis(self.enforce_ms.max(1))
    }

    pub fn web_blocklist_poll(&self) -> Duration {
        Duration::from_millis(self.web_blocklist_poll_ms.max(1))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub intervals: Intervals,
    pub shell_policy: ShellPolicy,
    /// Visits under this origin are the agent's own GUI and never logged.
    pub gui_origin: String,
    /// Overrides the platform default control endpoint.
    pub control_endpoint: Option<String>,
    pub extra_ignored_processes: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            cache_dir: default_cache_dir(),
            intervals: Intervals::default(),
            shell_policy: ShellPolicy::default(),
            gui_origin: "http://127.0.0.1:58141".into(),
            control_endpoint: None,
            extra_ignored_processes: Vec::new(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

impl AgentConfig {
    /// Resolves directories from the environment, then overlays `agent.json`
    /// from the data directory when one exists.
    pub fn load() -> Result<Self> {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let cache_dir = std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from);

        let mut config = Self::load_from(&data_dir.join(CONFIG_FILE))?;
        config.data_dir = data_dir;
        if let Some(cache_dir) = cache_dir {
            config.cache_dir = cache_dir;
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Rooted at `dir` for both data and cache, with default intervals.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            data_dir: dir.join("data"),
            cache_dir: dir.join("cache"),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("procguard.db")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.cache_dir.join("logs")
    }

    pub fn heartbeat_path(&self) -> PathBuf {
        self.cache_dir.join("extension_heartbeat")
    }

    pub fn shutdown_marker_path(&self) -> PathBuf {
        self.cache_dir.join("shutdown_requested")
    }

    pub fn control_endpoint(&self) -> String {
        if let Some(endpoint) = &self.control_endpoint {
            return endpoint.clone();
        }
        if cfg!(windows) {
            r"\\.\pipe\procguard".to_string()
        } else {
            self.data_dir.join("procguard.sock").display().to_string()
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.cache_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"intervals": {"enforce_ms": 500}, "shell_policy": "reject"}"#).unwrap();

        let config = AgentConfig::load_from(&path).unwrap();
        assert_eq!(config.intervals.enforce_ms, 500);
        assert_eq!(config.intervals.process_ms, 2_000);
        assert_eq!(config.shell_policy, ShellPolicy::Reject);
        assert_eq!(config.gui_origin, "http://127.0.0.1:58141");
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.intervals, Intervals::default());
    }

    #[test]
    fn paths_hang_off_configured_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::in_dir(dir.path());
        assert!(config.heartbeat_path().starts_with(dir.path().join("cache")));
        assert!(config.database_path().starts_with(dir.path().join("data")));
    }
}
