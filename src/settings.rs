use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct AgentSettings {
    password_hash: Option<String>,
    autostart_enabled: bool,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AgentSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            AgentSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn password_hash(&self) -> Option<String> {
        self.read().password_hash.clone()
    }

    pub fn set_password_hash(&self, hash: String) -> Result<()> {
        let mut guard = self.write();
        guard.password_hash = Some(hash);
        self.persist(&guard)
    }

    pub fn autostart_enabled(&self) -> bool {
        self.read().autostart_enabled
    }

    pub fn set_autostart_enabled(&self, enabled: bool) -> Result<()> {
        let mut guard = self.write();
        guard.autostart_enabled = enabled;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, AgentSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AgentSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &AgentSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
