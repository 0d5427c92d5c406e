use std::{fs, process::Command};

use super::{IntegrityLevel, ProcessInspector, WindowInfo};

/// X11 foreground lookup through `xprop`; privilege from the owning uid.
pub struct LinuxInspector;

fn xprop(args: &[&str]) -> Option<String> {
    let output = Command::new("xprop").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

/// `_NET_ACTIVE_WINDOW(WINDOW): window id # 0x3a00007` -> `0x3a00007`
fn parse_active_window(output: &str) -> Option<String> {
    let id = output.rsplit('#').next()?.trim();
    let id = id.split(|c: char| c == ',' || c.is_whitespace()).next()?.trim();
    if id.is_empty() || id == "0x0" {
        return None;
    }
    Some(id.to_string())
}

fn parse_window_props(output: &str) -> Option<WindowInfo> {
    let mut pid = None;
    let mut title = String::new();

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if key.starts_with("_NET_WM_PID") {
            pid = value.parse::<u32>().ok();
        } else if key.starts_with("_NET_WM_NAME") {
            title = value.trim_matches('"').replace("\\\"", "\"");
        }
    }

    pid.filter(|pid| *pid != 0).map(|pid| WindowInfo { pid, title })
}

fn owner_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

impl ProcessInspector for LinuxInspector {
    fn foreground_window(&self) -> Option<WindowInfo> {
        let active = xprop(&["-root", "_NET_ACTIVE_WINDOW"])?;
        let id = parse_active_window(&active)?;
        let props = xprop(&["-id", &id, "_NET_WM_PID", "_NET_WM_NAME"])?;
        parse_window_props(&props)
    }

    fn integrity_level(&self, pid: u32) -> Option<IntegrityLevel> {
        let status = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
        match owner_uid(&status)? {
            0 => Some(IntegrityLevel::System),
            _ => Some(IntegrityLevel::Medium),
        }
    }

    fn has_visible_window(&self, _pid: u32) -> bool {
        true
    }

    fn product_name(&self, _exe_path: &str) -> Option<String> {
        None
    }
}
