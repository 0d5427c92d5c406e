use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use super::{ProcessIdentity, ProcessSnapshot, ProcessTable};

/// [`ProcessTable`] over `sysinfo`. Each monitor loop owns its own instance.
pub struct SysinfoTable {
    system: System,
}

impl SysinfoTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh_one(&mut self, pid: u32, kind: ProcessRefreshKind) -> Option<&Process> {
        let pid = Pid::from_u32(pid);
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), kind);
        self.system.process(pid)
    }
}

impl Default for SysinfoTable {
    fn default() -> Self {
        Self::new()
    }
}

fn process_name(process: &Process) -> String {
    process.name().to_string_lossy().into_owned()
}

impl ProcessTable for SysinfoTable {
    fn snapshot(&mut self) -> Vec<ProcessSnapshot> {
        // Exe paths are needed for the filters; skip cpu/disk/environ sampling.
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );

        self.system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessSnapshot {
                pid: pid.as_u32(),
                name: process_name(process),
                exe: process.exe().map(|path| path.to_string_lossy().into_owned()),
                parent_pid: process.parent().map(|parent| parent.as_u32()),
                start_time: process.start_time(),
            })
            .collect()
    }

    fn identity(&mut self, pid: u32) -> Option<ProcessIdentity> {
        self.refresh_one(pid, ProcessRefreshKind::new())
            .map(|process| ProcessIdentity {
                name: process_name(process),
                start_time: process.start_time(),
            })
    }

    fn exe_path(&mut self, pid: u32) -> Option<String> {
        self.refresh_one(pid, ProcessRefreshKind::new().with_exe(UpdateKind::Always))
            .and_then(|process| process.exe())
            .map(|path| path.to_string_lossy().into_owned())
    }

    fn kill(&mut self, pid: u32) -> bool {
        self.system
            .process(Pid::from_u32(pid))
            .map(|process| process.kill())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sees_its_own_process() {
        let own_pid = std::process::id();
        let mut table = SysinfoTable::new();

        let snapshot = table.snapshot();
        let me = snapshot.iter().find(|p| p.pid == own_pid).expect("own pid listed");
        assert!(!me.name.is_empty());

        let identity = table.identity(own_pid).expect("identity");
        assert_eq!(identity.start_time, me.start_time);
    }
}
