use std::{collections::HashMap, sync::Arc, time::Instant};

use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{helpers::unix_now, Database},
    platform::{ProcessInspector, ProcessTable},
    policy::{PolicyFilter, ProcessDescriptor},
};

const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Executable path of a pid, valid only while the process start time still matches.
#[derive(Debug, Clone)]
struct CachedProcessInfo {
    exe_path: String,
    start_time: u64,
}

/// Attributes foreground time to (executable path, window title) pairs,
/// buffering it in memory between flushes. Every tick is worth one poll
/// period; sub-second remainders carry over to the next flush.
pub struct ScreenTimeMonitor {
    db: Database,
    table: Box<dyn ProcessTable>,
    inspector: Arc<dyn ProcessInspector>,
    policy: Arc<PolicyFilter>,
    tick_period: Duration,
    flush_interval: Duration,
    last_pair: Option<(String, String)>,
    pending: Duration,
    last_flush: Instant,
    exe_cache: HashMap<u32, CachedProcessInfo>,
}

impl ScreenTimeMonitor {
    pub fn new(
        db: Database,
        table: Box<dyn ProcessTable>,
        inspector: Arc<dyn ProcessInspector>,
        policy: Arc<PolicyFilter>,
        tick_period: Duration,
        flush_interval: Duration,
    ) -> Self {
        Self {
            db,
            table,
            inspector,
            policy,
            tick_period,
            flush_interval,
            last_pair: None,
            pending: Duration::ZERO,
            last_flush: Instant::now(),
            exe_cache: HashMap::new(),
        }
    }

    fn resolve_exe(&mut self, pid: u32, start_time: u64) -> Option<String> {
        if let Some(cached) = self.exe_cache.get(&pid) {
            if cached.start_time == start_time {
                return Some(cached.exe_path.clone());
            }
        }

        // Miss or recycled pid.
        self.exe_cache.remove(&pid);
        let exe_path = self.table.exe_path(pid)?;
        self.exe_cache.insert(
            pid,
            CachedProcessInfo {
                exe_path: exe_path.clone(),
                start_time,
            },
        );
        Some(exe_path)
    }

    /// One poll. Any resolution failure skips the tick silently.
    pub fn tick(&mut self, now: Instant) {
        let Some(window) = self.inspector.foreground_window() else {
            return;
        };
        if window.pid == 0 {
            return;
        }
        let Some(identity) = self.table.identity(window.pid) else {
            return;
        };
        let Some(exe_path) = self.resolve_exe(window.pid, identity.start_time) else {
            return;
        };

        let descriptor = ProcessDescriptor {
            pid: window.pid,
            name: &identity.name,
            parent_name: None,
        };
        if self.policy.should_exclude(&exe_path, Some(&descriptor)) {
            return;
        }

        let same_pair = matches!(
            &self.last_pair,
            Some((path, title)) if *path == exe_path && *title == window.title
        );

        if same_pair {
            self.pending += self.tick_period;
        } else {
            self.flush_pending();
            log_info!("foreground changed: {} ({})", exe_path, window.title);
            let initial = self.tick_period.as_secs();
            self.db
                .record_screen_time_start(&exe_path, &window.title, unix_now(), initial);
            self.pending = self.tick_period - Duration::from_secs(initial);
            self.last_pair = Some((exe_path, window.title));
        }

        if now.saturating_duration_since(self.last_flush) >= self.flush_interval {
            self.flush_pending();
            self.last_flush = now;
        }
    }

    /// Writes the buffered whole seconds onto the current pair's latest record.
    pub fn flush_pending(&mut self) {
        let seconds = self.pending.as_secs();
        if seconds == 0 {
            return;
        }
        if let Some((path, title)) = &self.last_pair {
            self.db.add_screen_time(path, title, seconds);
        }
        self.pending -= Duration::from_secs(seconds);
    }

    /// Drops all in-memory state; stored records are untouched.
    pub fn reset(&mut self) {
        self.last_pair = None;
        self.pending = Duration::ZERO;
        self.last_flush = Instant::now();
        self.exe_cache.clear();
    }
}

pub async fn screen_time_loop(
    mut monitor: ScreenTimeMonitor,
    period: Duration,
    mut reset_rx: mpsc::Receiver<()>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => monitor.tick(Instant::now()),
            Some(()) = reset_rx.recv() => {
                log_info!("screen time monitor reset, clearing in-memory state");
                monitor.reset();
            }
            _ = cancel_token.cancelled() => {
                monitor.flush_pending();
                log_info!("screen time monitor shutting down");
                break;
            }
        }
    }
}
