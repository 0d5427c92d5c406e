//! Advisory classifiers deciding which processes count as user applications.
//!
//! They run at user privilege and can be evaded by the processes they are
//! meant to exclude; they are not a security boundary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::platform::{IntegrityLevel, ProcessInspector};

const OS_PRODUCT_NAME: &str = "Microsoft® Windows® Operating System";

/// How interactive shells are treated by the lifecycle monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellPolicy {
    /// Shells are logged only when the desktop shell launched them, on every such launch.
    #[default]
    DesktopShellOnly,
    Reject,
}

/// The process a predicate is asked about, when one is known.
#[derive(Debug, Clone, Copy)]
pub struct ProcessDescriptor<'a> {
    pub pid: u32,
    pub name: &'a str,
    pub parent_name: Option<&'a str>,
}

/// Platform rule tables. All names and fragments are lowercase.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub system_dirs: Vec<String>,
    pub always_ignored: Vec<String>,
    /// Exact names, or prefixes when the entry ends in `-`.
    pub ignore_list: Vec<String>,
    pub shells: Vec<String>,
    pub desktop_shell: String,
    pub shell_policy: ShellPolicy,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

const LINUX_IGNORED: &[&str] = &[
    "systemd",
    "(sd-pam)",
    "dbus-daemon",
    ".gcr-ssh-agent-",
    ".gnome-keyring-",
    ".gnome-session-",
    ".gnome-shell-wr",
    ".at-spi-bus-lau",
    "at-spi2-registryd",
    ".gnome-shell-ca",
    "dconf-service",
    ".evolution-sour",
    ".org.gnome.shel",
    ".evolution-alar",
    ".org.gnome.scre",
    ".goa-daemon-wra",
    ".goa-identity-s",
    ".evolution-cale",
    ".evolution-addr",
    "gsd-",
    "gvfsd-",
    "gvfs-",
    "gdm-",
    "xdg-",
    "fusermount3",
    ".mutter-x11-fra",
    ".localsearch-3-",
    "pipewire",
    "pipewire-pulse",
    "wireplumber",
    "speech-dispatcher",
    "xwayland",
    "ssh-agent",
];

impl PolicyConfig {
    pub fn windows() -> Self {
        Self {
            system_dirs: owned(&["\\windows\\system32\\", "\\windows\\syswow64\\"]),
            always_ignored: owned(&["conhost.exe", "textinputhost.exe"]),
            ignore_list: Vec::new(),
            shells: owned(&["cmd.exe", "powershell.exe", "pwsh.exe"]),
            desktop_shell: "explorer.exe".into(),
            shell_policy: ShellPolicy::default(),
        }
    }

    pub fn linux() -> Self {
        Self {
            system_dirs: owned(&["/usr/libexec/", "/usr/lib/systemd/", "/usr/sbin/", "/sbin/"]),
            always_ignored: owned(&["conhost.exe", "textinputhost.exe"]),
            ignore_list: owned(LINUX_IGNORED),
            shells: Vec::new(),
            desktop_shell: String::new(),
            shell_policy: ShellPolicy::default(),
        }
    }

    pub fn for_current_platform() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else if cfg!(target_os = "linux") {
            Self::linux()
        } else {
            Self {
                system_dirs: Vec::new(),
                ignore_list: Vec::new(),
                ..Self::linux()
            }
        }
    }

    pub fn with_shell_policy(mut self, policy: ShellPolicy) -> Self {
        self.shell_policy = policy;
        self
    }

    pub fn with_extra_ignored<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignore_list
            .extend(names.into_iter().map(|n| n.as_ref().to_lowercase()));
        self
    }
}

/// Matches `name` against an ignore list. Entries ending in `-` are prefixes and
/// also match names truncated with a leading `.`.
pub fn is_ignored(name: &str, ignore_list: &[String]) -> bool {
    let name = name.to_lowercase();
    ignore_list.iter().any(|ignored| match ignored.strip_suffix('-') {
        Some(prefix) => {
            name.starts_with(prefix) || name.trim_start_matches('.').starts_with(prefix)
        }
        None => name == *ignored,
    })
}

pub struct PolicyFilter {
    config: PolicyConfig,
    inspector: Arc<dyn ProcessInspector>,
    own_pid: u32,
    own_exe: Option<String>,
}

impl PolicyFilter {
    pub fn new(config: PolicyConfig, inspector: Arc<dyn ProcessInspector>) -> Self {
        let own_exe = std::env::current_exe()
            .ok()
            .map(|path| path.to_string_lossy().to_lowercase());
        Self {
            config,
            inspector,
            own_pid: std::process::id(),
            own_exe,
        }
    }

    pub fn own_pid(&self) -> u32 {
        self.own_pid
    }

    fn is_shell(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.config.shells.iter().any(|shell| *shell == name)
    }

    fn launched_by_desktop_shell(&self, proc: &ProcessDescriptor<'_>) -> bool {
        !self.config.desktop_shell.is_empty()
            && proc
                .parent_name
                .map(|parent| parent.eq_ignore_ascii_case(&self.config.desktop_shell))
                .unwrap_or(false)
    }

    /// A shell launch that bypasses per-name deduplication.
    pub fn is_desktop_shell_launch(&self, proc: &ProcessDescriptor<'_>) -> bool {
        self.config.shell_policy == ShellPolicy::DesktopShellOnly
            && self.is_shell(proc.name)
            && self.launched_by_desktop_shell(proc)
    }

    /// True for the agent itself, OS components, and privileged services.
    pub fn should_exclude(&self, exe_path: &str, proc: Option<&ProcessDescriptor<'_>>) -> bool {
        let exe_lower = exe_path.to_lowercase();

        if let Some(proc) = proc {
            if proc.pid == self.own_pid {
                return true;
            }
        }
        if !exe_lower.is_empty() && self.own_exe.as_deref() == Some(exe_lower.as_str()) {
            return true;
        }

        let name = proc
            .map(|p| p.name.to_lowercase())
            .unwrap_or_else(|| file_name(&exe_lower).to_string());
        if self.config.always_ignored.iter().any(|n| *n == name)
            || is_ignored(&name, &self.config.ignore_list)
        {
            return true;
        }

        // Shells live in system directories; a desktop launch is still user activity.
        let desktop_shell_launch = proc.map_or(false, |p| self.is_desktop_shell_launch(p));

        if !desktop_shell_launch
            && self
                .config
                .system_dirs
                .iter()
                .any(|dir| exe_lower.contains(dir.as_str()))
        {
            return true;
        }

        if !desktop_shell_launch && !exe_path.is_empty() {
            if let Some(product) = self.inspector.product_name(exe_path) {
                if product.contains(OS_PRODUCT_NAME) {
                    return true;
                }
            }
        }

        if let Some(proc) = proc {
            if let Some(level) = self.inspector.integrity_level(proc.pid) {
                if level >= IntegrityLevel::System {
                    return true;
                }
            }
        }

        false
    }

    /// True only for processes a user can see and interact with.
    pub fn should_track(&self, _exe_path: &str, proc: Option<&ProcessDescriptor<'_>>) -> bool {
        let Some(proc) = proc else {
            return false;
        };

        if self.is_shell(proc.name) {
            return match self.config.shell_policy {
                ShellPolicy::Reject => false,
                ShellPolicy::DesktopShellOnly => self.launched_by_desktop_shell(proc),
            };
        }

        self.inspector.has_visible_window(proc.pid)
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit(|c: char| c == '\\' || c == '/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeSystem;

    fn windows_filter(system: &FakeSystem, policy: ShellPolicy) -> PolicyFilter {
        PolicyFilter::new(
            PolicyConfig::windows().with_shell_policy(policy),
            system.inspector(),
        )
    }

    fn desc<'a>(pid: u32, name: &'a str, parent: Option<&'a str>) -> ProcessDescriptor<'a> {
        ProcessDescriptor {
            pid,
            name,
            parent_name: parent,
        }
    }

    #[test]
    fn excludes_self_system_dirs_and_privileged() {
        let system = FakeSystem::default();
        system.set_integrity(40, IntegrityLevel::System);
        let filter = windows_filter(&system, ShellPolicy::DesktopShellOnly);

        let me = desc(std::process::id(), "procguard.exe", None);
        assert!(filter.should_exclude("C:\\Tools\\procguard.exe", Some(&me)));
        assert!(filter.should_exclude("C:\\Windows\\System32\\taskmgr.exe", None));
        assert!(filter.should_exclude("C:\\Windows\\SysWOW64\\notepad.exe", None));
        assert!(filter.should_exclude("C:\\Windows\\conhost.exe", None));
        assert!(filter.should_exclude(
            "C:\\Program Files\\svc.exe",
            Some(&desc(40, "svc.exe", None))
        ));
        assert!(!filter.should_exclude(
            "C:\\Program Files\\Editor\\editor.exe",
            Some(&desc(41, "editor.exe", None))
        ));
    }

    #[test]
    fn shells_follow_policy() {
        let system = FakeSystem::default();
        let lenient = windows_filter(&system, ShellPolicy::DesktopShellOnly);
        let strict = windows_filter(&system, ShellPolicy::Reject);

        let from_desktop = desc(10, "cmd.exe", Some("Explorer.EXE"));
        let from_ide = desc(11, "powershell.exe", Some("code.exe"));

        assert!(lenient.should_track("", Some(&from_desktop)));
        assert!(lenient.is_desktop_shell_launch(&from_desktop));
        assert!(!lenient.should_track("", Some(&from_ide)));
        assert!(!strict.should_track("", Some(&from_desktop)));
        assert!(!strict.is_desktop_shell_launch(&from_desktop));
    }

    #[test]
    fn tracking_needs_a_visible_window() {
        let system = FakeSystem::default();
        system.hide_windows(20);
        let filter = windows_filter(&system, ShellPolicy::default());

        assert!(!filter.should_track("C:\\bg.exe", Some(&desc(20, "bg.exe", None))));
        assert!(filter.should_track("C:\\app.exe", Some(&desc(21, "app.exe", None))));
        assert!(!filter.should_track("C:\\app.exe", None));
    }

    #[test]
    fn ignore_list_prefixes_and_exact_names() {
        let list = PolicyConfig::linux().ignore_list;
        assert!(is_ignored("gsd-color", &list));
        assert!(is_ignored(".gnome-keyring-daemon", &list));
        assert!(is_ignored("systemd", &list));
        assert!(is_ignored("Xwayland", &list));
        assert!(!is_ignored("systemd-resolved", &list));
        assert!(!is_ignored("firefox", &list));
    }

    #[test]
    fn extra_ignored_names_are_honored() {
        let system = FakeSystem::default();
        let filter = PolicyFilter::new(
            PolicyConfig::linux().with_extra_ignored(["Slack"]),
            system.inspector(),
        );
        assert!(filter.should_exclude("/opt/slack/slack", Some(&desc(5, "slack", None))));
    }
}
