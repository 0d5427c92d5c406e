use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{helpers::unix_now, Database},
    platform::{ProcessSnapshot, ProcessTable},
    policy::{PolicyFilter, ProcessDescriptor},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Start time to record for a process; falls back to `now` when the OS reported none.
fn recorded_start(start_time: u64, now: i64) -> i64 {
    match i64::try_from(start_time) {
        Ok(start) if start > 0 => start,
        _ => now,
    }
}

/// Turns process-table polls into open/close events.
pub struct ProcessMonitor {
    db: Database,
    table: Box<dyn ProcessTable>,
    policy: Arc<PolicyFilter>,
    /// Logged pids and the start time they were logged with.
    known: HashMap<u32, u64>,
    /// Lowercase names already logged since the last reset.
    logged: HashSet<String>,
    /// Exclusion verdicts of live, unlogged pids, keyed by pid with the start
    /// time they were computed for. Exclusion never changes for one instance;
    /// window visibility can, so trackability is re-checked every tick.
    exclusions: HashMap<u32, (u64, bool)>,
}

impl ProcessMonitor {
    pub fn new(db: Database, table: Box<dyn ProcessTable>, policy: Arc<PolicyFilter>) -> Self {
        Self {
            db,
            table,
            policy,
            known: HashMap::new(),
            logged: HashSet::new(),
            exclusions: HashMap::new(),
        }
    }

    /// Closes events left open by an unclean shutdown and adopts the ones whose
    /// process is still the same instance.
    pub async fn reconcile(&mut self) -> Result<()> {
        let open = self.db.open_events().await?;
        let live: HashMap<u32, u64> = self
            .table
            .snapshot()
            .into_iter()
            .map(|p| (p.pid, p.start_time))
            .collect();
        let now = unix_now();

        let mut closed = 0usize;
        for (pid, start) in open {
            match live.get(&pid) {
                Some(&live_start) if recorded_start(live_start, now) == start => {
                    self.known.insert(pid, live_start);
                }
                _ => {
                    self.db.log_process_end(pid, now);
                    closed += 1;
                }
            }
        }

        log_info!(
            "process monitor reconciled: {} still running, {} closed",
            self.known.len(),
            closed
        );
        Ok(())
    }

    pub fn tick(&mut self) {
        let snapshot = self.table.snapshot();
        let now = unix_now();
        let by_pid: HashMap<u32, &ProcessSnapshot> = snapshot.iter().map(|p| (p.pid, p)).collect();

        // A pid that vanished, or now names a different instance, is closed.
        let ended: Vec<u32> = self
            .known
            .iter()
            .filter(|(pid, start)| {
                by_pid
                    .get(pid)
                    .map_or(true, |live| live.start_time != **start)
            })
            .map(|(pid, _)| *pid)
            .collect();
        for pid in ended {
            self.known.remove(&pid);
            self.db.log_process_end(pid, now);
        }
        self.exclusions.retain(|pid, (start, _)| {
            by_pid.get(pid).map_or(false, |live| live.start_time == *start)
        });

        for process in &snapshot {
            if self.known.contains_key(&process.pid) {
                continue;
            }
            if process.pid == self.policy.own_pid() {
                self.known.insert(process.pid, process.start_time);
                continue;
            }

            let parent_name = process
                .parent_pid
                .and_then(|ppid| by_pid.get(&ppid))
                .map(|parent| parent.name.as_str());

            if self.qualifies(process, parent_name) {
                self.db.log_process_start(
                    &process.name,
                    process.pid,
                    parent_name,
                    process.exe.as_deref(),
                    recorded_start(process.start_time, now),
                );
                self.logged.insert(process.name.to_lowercase());
                self.known.insert(process.pid, process.start_time);
            }
        }
    }

    /// Dedup, then exclusion, then the trackability check.
    fn qualifies(&mut self, process: &ProcessSnapshot, parent_name: Option<&str>) -> bool {
        if let Some(&(start, true)) = self.exclusions.get(&process.pid) {
            if start == process.start_time {
                return false;
            }
        }

        let name_lower = process.name.to_lowercase();
        if name_lower.is_empty() {
            return false;
        }

        let descriptor = ProcessDescriptor {
            pid: process.pid,
            name: &process.name,
            parent_name,
        };

        if self.logged.contains(&name_lower) && !self.policy.is_desktop_shell_launch(&descriptor) {
            return false;
        }

        let exe = process.exe.as_deref().unwrap_or_default();
        let excluded = match self.exclusions.get(&process.pid) {
            Some(&(start, excluded)) if start == process.start_time => excluded,
            _ => {
                let excluded = self.policy.should_exclude(exe, Some(&descriptor));
                self.exclusions
                    .insert(process.pid, (process.start_time, excluded));
                excluded
            }
        };
        !excluded && self.policy.should_track(exe, Some(&descriptor))
    }

    /// Forgets everything so still-running applications are logged again.
    pub fn reset(&mut self) {
        self.known.clear();
        self.logged.clear();
        self.exclusions.clear();
    }
}

pub async fn process_loop(
    mut monitor: ProcessMonitor,
    period: Duration,
    mut reset_rx: mpsc::Receiver<()>,
    cancel_token: CancellationToken,
) {
    if let Err(err) = monitor.reconcile().await {
        log_error!("failed to reconcile open process events: {err:?}");
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => monitor.tick(),
            Some(()) = reset_rx.recv() => {
                log_info!("process monitor reset, clearing in-memory state");
                monitor.reset();
            }
            _ = cancel_token.cancelled() => {
                log_info!("process monitor shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_support::open_temp, AppEvent};
    use crate::platform::{fake::FakeSystem, IntegrityLevel};
    use crate::policy::{PolicyConfig, ShellPolicy};

    fn monitor(db: &Database, system: &FakeSystem, policy: ShellPolicy) -> ProcessMonitor {
        let filter = PolicyFilter::new(
            PolicyConfig::windows().with_shell_policy(policy),
            system.inspector(),
        );
        ProcessMonitor::new(db.clone(), system.table(), Arc::new(filter))
    }

    async fn events(db: &Database) -> Vec<AppEvent> {
        db.flush().await.unwrap();
        let mut events = db.search_app_events(None, None, None).await.unwrap();
        events.sort_by_key(|e| e.id);
        events
    }

    async fn open_for(db: &Database, pid: u32) -> usize {
        events(db)
            .await
            .iter()
            .filter(|e| e.pid == pid && e.end_time.is_none())
            .count()
    }

    #[tokio::test]
    async fn vanished_pid_is_closed_once() {
        let (_dir, db) = open_temp();
        let system = FakeSystem::default();
        let mut monitor = monitor(&db, &system, ShellPolicy::default());

        system.spawn(100, "notepad.exe", "C:\\Apps\\notepad.exe", None, 1_000);
        monitor.tick();
        assert_eq!(open_for(&db, 100).await, 1);

        system.exit(100);
        monitor.tick();
        monitor.tick();

        let events = events(&db).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_time.timestamp(), 1_000);
        assert!(events[0].end_time.is_some());
    }

    #[tokio::test]
    async fn reused_pid_is_closed_and_reevaluated() {
        let (_dir, db) = open_temp();
        let system = FakeSystem::default();
        let mut monitor = monitor(&db, &system, ShellPolicy::default());

        system.spawn(100, "notepad.exe", "C:\\Apps\\notepad.exe", None, 1_000);
        monitor.tick();
        system.spawn(100, "game.exe", "C:\\Games\\game.exe", None, 2_000);
        monitor.tick();

        let events = events(&db).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].end_time.is_some());
        assert_eq!(events[1].process_name, "game.exe");
        assert!(events[1].end_time.is_none());
        assert_eq!(open_for(&db, 100).await, 1);
    }

    #[tokio::test]
    async fn names_are_logged_once_until_reset() {
        let (_dir, db) = open_temp();
        let system = FakeSystem::default();
        let mut monitor = monitor(&db, &system, ShellPolicy::default());

        system.spawn(1, "chrome.exe", "C:\\Chrome\\chrome.exe", None, 10);
        system.spawn(2, "chrome.exe", "C:\\Chrome\\chrome.exe", None, 11);
        monitor.tick();
        assert_eq!(events(&db).await.len(), 1);

        db.clear_app_history();
        monitor.reset();
        monitor.tick();
        let events = events(&db).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].process_name, "chrome.exe");
    }

    #[tokio::test]
    async fn filters_hidden_and_excluded_processes() {
        let (_dir, db) = open_temp();
        let system = FakeSystem::default();
        let mut monitor = monitor(&db, &system, ShellPolicy::default());

        system.spawn(5, "svchost.exe", "C:\\Windows\\System32\\svchost.exe", None, 1);
        system.spawn(6, "updater.exe", "C:\\Apps\\updater.exe", None, 1);
        system.hide_windows(6);
        system.spawn(std::process::id(), "procguard.exe", "C:\\pg\\procguard.exe", None, 1);
        monitor.tick();

        assert!(events(&db).await.is_empty());
    }

    #[tokio::test]
    async fn exclusion_is_evaluated_once_per_instance() {
        let (_dir, db) = open_temp();
        let system = FakeSystem::default();
        let mut monitor = monitor(&db, &system, ShellPolicy::default());

        system.spawn(40, "agent.exe", "C:\\Apps\\agent.exe", None, 1);
        system.set_integrity(40, IntegrityLevel::System);
        monitor.tick();
        monitor.tick();
        monitor.tick();
        assert_eq!(system.integrity_reads(), 1);

        // Same pid, new instance: judged afresh.
        system.spawn(40, "agent.exe", "C:\\Apps\\agent.exe", None, 2);
        system.set_integrity(40, IntegrityLevel::Medium);
        monitor.tick();
        assert_eq!(system.integrity_reads(), 2);
        assert_eq!(open_for(&db, 40).await, 1);
    }

    #[tokio::test]
    async fn late_windows_are_still_picked_up() {
        let (_dir, db) = open_temp();
        let system = FakeSystem::default();
        let mut monitor = monitor(&db, &system, ShellPolicy::default());

        system.spawn(41, "slowapp.exe", "C:\\Apps\\slowapp.exe", None, 1);
        system.hide_windows(41);
        monitor.tick();
        assert_eq!(open_for(&db, 41).await, 0);

        system.show_windows(41);
        monitor.tick();
        assert_eq!(open_for(&db, 41).await, 1);
        assert_eq!(system.integrity_reads(), 1);
    }

    #[tokio::test]
    async fn desktop_shells_bypass_dedup() {
        let (_dir, db) = open_temp();
        let system = FakeSystem::default();
        let mut monitor = monitor(&db, &system, ShellPolicy::DesktopShellOnly);

        system.spawn(1, "explorer.exe", "C:\\Windows\\explorer.exe", None, 1);
        system.spawn(2, "cmd.exe", "C:\\Windows\\System32\\cmd.exe", Some(1), 5);
        system.spawn(3, "cmd.exe", "C:\\Windows\\System32\\cmd.exe", Some(1), 6);
        system.spawn(4, "cmd.exe", "C:\\Windows\\System32\\cmd.exe", Some(9), 7);
        monitor.tick();

        let shells: Vec<_> = events(&db)
            .await
            .into_iter()
            .filter(|e| e.process_name == "cmd.exe")
            .map(|e| e.pid)
            .collect();
        assert_eq!(shells, vec![2, 3]);
    }

    #[tokio::test]
    async fn rejected_shells_are_never_logged() {
        let (_dir, db) = open_temp();
        let system = FakeSystem::default();
        let mut monitor = monitor(&db, &system, ShellPolicy::Reject);

        system.spawn(1, "explorer.exe", "C:\\Windows\\explorer.exe", None, 1);
        system.spawn(2, "pwsh.exe", "C:\\Program Files\\PowerShell\\pwsh.exe", Some(1), 5);
        monitor.tick();

        let names: Vec<_> = events(&db).await.into_iter().map(|e| e.process_name).collect();
        assert_eq!(names, vec!["explorer.exe"]);
    }

    #[tokio::test]
    async fn cold_start_closes_stale_events() {
        let (_dir, db) = open_temp();
        let system = FakeSystem::default();

        db.log_process_start("gone.exe", 70, None, None, 500);
        db.log_process_start("alive.exe", 71, None, None, 600);
        db.log_process_start("reused.exe", 72, None, None, 700);
        db.flush().await.unwrap();

        system.spawn(71, "alive.exe", "C:\\Apps\\alive.exe", None, 600);
        system.spawn(72, "other.exe", "C:\\Apps\\other.exe", None, 9_999);

        let mut monitor = monitor(&db, &system, ShellPolicy::default());
        monitor.reconcile().await.unwrap();
        monitor.tick();

        let events = events(&db).await;
        let open: Vec<_> = events
            .iter()
            .filter(|e| e.end_time.is_none())
            .map(|e| e.process_name.as_str())
            .collect();
        assert_eq!(open, vec!["alive.exe", "other.exe"]);
        assert_eq!(open_for(&db, 71).await, 1);
    }
}
