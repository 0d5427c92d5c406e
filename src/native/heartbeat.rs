use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::db::helpers::{from_unix, unix_now};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// How many missed heartbeats are tolerated before the extension counts as gone.
const STALE_AFTER_BEATS: u32 = 3;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExtensionStatus {
    pub alive: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

pub fn write_heartbeat(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, unix_now().to_string())
        .with_context(|| format!("Failed to write heartbeat {}", path.display()))
}

pub fn read_heartbeat(path: &Path) -> Option<i64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

pub fn extension_status(path: &Path, interval: Duration) -> ExtensionStatus {
    extension_status_at(path, interval, unix_now())
}

pub fn extension_status_at(path: &Path, interval: Duration, now: i64) -> ExtensionStatus {
    let Some(last) = read_heartbeat(path) else {
        return ExtensionStatus {
            alive: false,
            last_seen: None,
        };
    };

    let window = (interval * STALE_AFTER_BEATS).as_secs().max(1) as i64;
    ExtensionStatus {
        alive: now - last <= window,
        last_seen: from_unix(last, "heartbeat").ok(),
    }
}

/// Rewrites the heartbeat file every `period`, independent of message traffic.
pub async fn heartbeat_loop(path: PathBuf, period: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = write_heartbeat(&path) {
                    log_warn!("{err:?}");
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}
