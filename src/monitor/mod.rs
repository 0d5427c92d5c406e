use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::AgentConfig,
    db::Database,
    platform::{ProcessInspector, ProcessTable},
    policy::{PolicyConfig, PolicyFilter},
};

pub mod enforcer;
pub mod process_events;
pub mod screen_time;

pub use enforcer::BlockListEnforcer;
pub use process_events::ProcessMonitor;
pub use screen_time::ScreenTimeMonitor;

/// Non-blocking, capacity-one reset requests for the process and screen-time loops.
#[derive(Clone)]
pub struct ResetSignals {
    process: mpsc::Sender<()>,
    screen_time: mpsc::Sender<()>,
}

impl ResetSignals {
    pub fn new(process: mpsc::Sender<()>, screen_time: mpsc::Sender<()>) -> Self {
        Self {
            process,
            screen_time,
        }
    }

    pub fn fire(&self) {
        for (name, tx) in [("process", &self.process), ("screen time", &self.screen_time)] {
            match tx.try_send(()) {
                // A pending reset already covers this one.
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Closed(())) => warn!("{name} monitor is not running, reset dropped"),
            }
        }
    }
}

/// Owns the background monitor loops of the daemon.
pub struct MonitorController {
    handles: Vec<JoinHandle<()>>,
    cancel_token: CancellationToken,
    resets: ResetSignals,
}

impl MonitorController {
    /// Spawns the process, screen-time and enforcement loops. Each gets its own
    /// process table from `new_table`.
    pub fn start<F>(
        db: &Database,
        config: &AgentConfig,
        inspector: Arc<dyn ProcessInspector>,
        mut new_table: F,
    ) -> Self
    where
        F: FnMut() -> Box<dyn ProcessTable>,
    {
        let policy = Arc::new(PolicyFilter::new(
            PolicyConfig::for_current_platform()
                .with_shell_policy(config.shell_policy)
                .with_extra_ignored(&config.extra_ignored_processes),
            inspector.clone(),
        ));
        let intervals = &config.intervals;
        let cancel_token = CancellationToken::new();

        let (process_tx, process_rx) = mpsc::channel(1);
        let (screen_tx, screen_rx) = mpsc::channel(1);

        let process_monitor = ProcessMonitor::new(db.clone(), new_table(), policy.clone());
        let screen_monitor = ScreenTimeMonitor::new(
            db.clone(),
            new_table(),
            inspector,
            policy,
            intervals.screen_time(),
            intervals.screen_time_flush(),
        );
        let enforcer = BlockListEnforcer::new(db.clone(), new_table());

        let handles = vec![
            tokio::spawn(process_events::process_loop(
                process_monitor,
                intervals.process(),
                process_rx,
                cancel_token.clone(),
            )),
            tokio::spawn(screen_time::screen_time_loop(
                screen_monitor,
                intervals.screen_time(),
                screen_rx,
                cancel_token.clone(),
            )),
            tokio::spawn(enforcer::enforcer_loop(
                enforcer,
                intervals.enforce(),
                cancel_token.clone(),
            )),
        ];
        info!("monitor loops started");

        Self {
            handles,
            cancel_token,
            resets: ResetSignals::new(process_tx, screen_tx),
        }
    }

    pub fn resets(&self) -> ResetSignals {
        self.resets.clone()
    }

    /// Cancels every loop and waits for them; screen time flushes on the way out.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel_token.cancel();
        for handle in self.handles.drain(..) {
            handle.await.context("monitor loop task failed to join")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_temp;
    use crate::platform::fake::FakeSystem;

    #[tokio::test]
    async fn reset_signal_never_blocks() {
        let (process_tx, _process_rx) = mpsc::channel(1);
        let (screen_tx, screen_rx) = mpsc::channel(1);
        drop(screen_rx);
        let resets = ResetSignals::new(process_tx, screen_tx);

        resets.fire();
        resets.fire();
        resets.fire();
    }

    #[tokio::test]
    async fn loops_start_and_stop() {
        let (dir, db) = open_temp();
        let system = FakeSystem::default();
        let mut config = AgentConfig::in_dir(dir.path());
        config.intervals.process_ms = 10;
        config.intervals.screen_time_ms = 10;
        config.intervals.enforce_ms = 10;

        let mut controller = MonitorController::start(&db, &config, system.inspector(), || system.table());
        controller.resets().fire();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        controller.shutdown().await.unwrap();
    }
}
