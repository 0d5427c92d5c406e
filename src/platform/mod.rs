//! OS capability layer: the process table and window/privilege inspection.
//!
//! Monitors only talk to the traits here, so each loop can be driven by an
//! in-memory table in tests.

use std::sync::Arc;

#[cfg(not(any(windows, target_os = "linux")))]
mod fallback;
#[cfg(target_os = "linux")]
mod linux;
mod sysinfo_table;
#[cfg(windows)]
mod windows;

pub use sysinfo_table::SysinfoTable;

/// One live process as seen by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub exe: Option<String>,
    pub parent_pid: Option<u32>,
    /// Creation time in Unix seconds; with `pid` it identifies one process instance.
    pub start_time: u64,
}

/// Cheap identity of a single pid, without the executable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub name: String,
    pub start_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub pid: u32,
    pub title: String,
}

/// Mandatory integrity level, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntegrityLevel {
    Untrusted,
    Low,
    Medium,
    High,
    System,
    Protected,
}

pub trait ProcessTable: Send {
    /// Refreshes and returns every live process.
    fn snapshot(&mut self) -> Vec<ProcessSnapshot>;

    fn identity(&mut self, pid: u32) -> Option<ProcessIdentity>;

    fn exe_path(&mut self, pid: u32) -> Option<String>;

    /// Best-effort termination; `false` when the OS refused or the pid is gone.
    fn kill(&mut self, pid: u32) -> bool;
}

pub trait ProcessInspector: Send + Sync {
    fn foreground_window(&self) -> Option<WindowInfo>;

    fn integrity_level(&self, pid: u32) -> Option<IntegrityLevel>;

    fn has_visible_window(&self, pid: u32) -> bool;

    /// Product name from the executable's version metadata.
    fn product_name(&self, exe_path: &str) -> Option<String>;
}

pub fn current_inspector() -> Arc<dyn ProcessInspector> {
    #[cfg(windows)]
    {
        Arc::new(windows::WindowsInspector)
    }
    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::LinuxInspector)
    }
    #[cfg(not(any(windows, target_os = "linux")))]
    {
        Arc::new(fallback::PermissiveInspector)
    }
}

pub fn new_process_table() -> Box<dyn ProcessTable> {
    Box::new(SysinfoTable::new())
}
