use super::{IntegrityLevel, ProcessInspector, WindowInfo};

/// For platforms without window inspection: nothing is foreground, everything is trackable.
pub struct PermissiveInspector;

impl ProcessInspector for PermissiveInspector {
    fn foreground_window(&self) -> Option<WindowInfo> {
        None
    }

    fn integrity_level(&self, _pid: u32) -> Option<IntegrityLevel> {
        None
    }

    fn has_visible_window(&self, _pid: u32) -> bool {
        true
    }

    fn product_name(&self, _exe_path: &str) -> Option<String> {
        None
    }
}
