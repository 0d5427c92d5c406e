use std::collections::HashSet;

use anyhow::Result;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{db::Database, platform::ProcessTable};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Kills running processes whose name is on the application block list.
/// Holds no state between ticks.
pub struct BlockListEnforcer {
    db: Database,
    table: Box<dyn ProcessTable>,
    own_pid: u32,
}

impl BlockListEnforcer {
    pub fn new(db: Database, table: Box<dyn ProcessTable>) -> Self {
        Self {
            db,
            table,
            own_pid: std::process::id(),
        }
    }

    /// Returns how many processes were terminated.
    pub async fn tick(&mut self) -> Result<usize> {
        let blocked: HashSet<String> = self.db.load_app_blocklist().await?.into_iter().collect();
        if blocked.is_empty() {
            return Ok(0);
        }

        let mut killed = 0;
        for process in self.table.snapshot() {
            if process.pid == self.own_pid || !blocked.contains(&process.name.to_lowercase()) {
                continue;
            }
            if self.table.kill(process.pid) {
                log_info!("terminated blocked process {} (pid {})", process.name, process.pid);
                killed += 1;
            } else {
                // Retried on the next tick.
                log_warn!("failed to terminate blocked process {} (pid {})", process.name, process.pid);
            }
        }
        Ok(killed)
    }
}

pub async fn enforcer_loop(
    mut enforcer: BlockListEnforcer,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = enforcer.tick().await {
                    log_error!("block list enforcement failed: {err:?}");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("block list enforcer shutting down");
                break;
            }
        }
    }
}
