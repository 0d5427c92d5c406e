use std::{ffi::OsStr, os::windows::ffi::OsStrExt, ptr};

use winapi::{
    shared::{
        minwindef::{BOOL, DWORD, FALSE, LPARAM, LPCVOID, LPVOID, TRUE, UINT},
        windef::HWND,
    },
    um::{
        handleapi::CloseHandle,
        processthreadsapi::{OpenProcess, OpenProcessToken},
        securitybaseapi::{GetSidSubAuthority, GetSidSubAuthorityCount, GetTokenInformation},
        winnt::{
            TokenIntegrityLevel, HANDLE, PROCESS_QUERY_LIMITED_INFORMATION, TOKEN_MANDATORY_LABEL,
            TOKEN_QUERY,
        },
        winuser::{
            EnumWindows, GetForegroundWindow, GetWindowTextLengthW, GetWindowTextW,
            GetWindowThreadProcessId, IsWindowVisible,
        },
        winver::{GetFileVersionInfoSizeW, GetFileVersionInfoW, VerQueryValueW},
    },
};

use super::{IntegrityLevel, ProcessInspector, WindowInfo};

pub struct WindowsInspector;

struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

fn wide(value: &str) -> Vec<u16> {
    OsStr::new(value).encode_wide().chain(Some(0)).collect()
}

fn level_from_rid(rid: u32) -> IntegrityLevel {
    match rid {
        r if r >= 0x5000 => IntegrityLevel::Protected,
        r if r >= 0x4000 => IntegrityLevel::System,
        r if r >= 0x3000 => IntegrityLevel::High,
        r if r >= 0x2000 => IntegrityLevel::Medium,
        r if r >= 0x1000 => IntegrityLevel::Low,
        _ => IntegrityLevel::Untrusted,
    }
}

struct VisibleWindowSearch {
    pid: DWORD,
    found: bool,
}

unsafe extern "system" fn visible_window_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = &mut *(lparam as *mut VisibleWindowSearch);
    let mut window_pid: DWORD = 0;
    GetWindowThreadProcessId(hwnd, &mut window_pid);
    if window_pid == search.pid && IsWindowVisible(hwnd) != 0 {
        search.found = true;
        return FALSE;
    }
    TRUE
}

impl ProcessInspector for WindowsInspector {
    fn foreground_window(&self) -> Option<WindowInfo> {
        unsafe {
            let hwnd = GetForegroundWindow();
            if hwnd.is_null() {
                return None;
            }

            let mut pid: DWORD = 0;
            GetWindowThreadProcessId(hwnd, &mut pid);
            if pid == 0 {
                return None;
            }

            let len = GetWindowTextLengthW(hwnd).max(0) as usize;
            let mut buffer = vec![0u16; len + 1];
            let copied = GetWindowTextW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32);
            let title = String::from_utf16_lossy(&buffer[..copied.max(0) as usize]);

            Some(WindowInfo { pid, title })
        }
    }

    fn integrity_level(&self, pid: u32) -> Option<IntegrityLevel> {
        unsafe {
            let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid);
            if process.is_null() {
                return None;
            }
            let process = OwnedHandle(process);

            let mut token: HANDLE = ptr::null_mut();
            if OpenProcessToken(process.0, TOKEN_QUERY, &mut token) == 0 {
                return None;
            }
            let token = OwnedHandle(token);

            let mut needed: DWORD = 0;
            GetTokenInformation(token.0, TokenIntegrityLevel, ptr::null_mut(), 0, &mut needed);
            if needed == 0 {
                return None;
            }

            let mut buffer = vec![0u8; needed as usize];
            if GetTokenInformation(
                token.0,
                TokenIntegrityLevel,
                buffer.as_mut_ptr() as LPVOID,
                needed,
                &mut needed,
            ) == 0
            {
                return None;
            }

            let label = &*(buffer.as_ptr() as *const TOKEN_MANDATORY_LABEL);
            let sid = label.Label.Sid;
            let count = *GetSidSubAuthorityCount(sid);
            if count == 0 {
                return None;
            }
            let rid = *GetSidSubAuthority(sid, DWORD::from(count - 1));
            Some(level_from_rid(rid))
        }
    }

    fn has_visible_window(&self, pid: u32) -> bool {
        let mut search = VisibleWindowSearch { pid, found: false };
        unsafe {
            EnumWindows(
                Some(visible_window_callback),
                &mut search as *mut VisibleWindowSearch as LPARAM,
            );
        }
        search.found
    }

    fn product_name(&self, exe_path: &str) -> Option<String> {
        let path = wide(exe_path);
        unsafe {
            let mut handle: DWORD = 0;
            let size = GetFileVersionInfoSizeW(path.as_ptr(), &mut handle);
            if size == 0 {
                return None;
            }
            let mut data = vec![0u8; size as usize];
            if GetFileVersionInfoW(path.as_ptr(), 0, size, data.as_mut_ptr() as LPVOID) == 0 {
                return None;
            }

            let mut translation: LPVOID = ptr::null_mut();
            let mut translation_len: UINT = 0;
            let query = wide("\\VarFileInfo\\Translation");
            if VerQueryValueW(
                data.as_ptr() as LPCVOID,
                query.as_ptr(),
                &mut translation,
                &mut translation_len,
            ) == 0
                || translation_len < 4
            {
                return None;
            }
            let pair = translation as *const u16;
            let (lang, codepage) = (*pair, *pair.add(1));

            let query = wide(&format!(
                "\\StringFileInfo\\{lang:04x}{codepage:04x}\\ProductName"
            ));
            let mut value: LPVOID = ptr::null_mut();
            let mut value_len: UINT = 0;
            if VerQueryValueW(
                data.as_ptr() as LPCVOID,
                query.as_ptr(),
                &mut value,
                &mut value_len,
            ) == 0
                || value_len == 0
            {
                return None;
            }

            let chars = std::slice::from_raw_parts(value as *const u16, value_len as usize);
            let end = chars.iter().position(|c| *c == 0).unwrap_or(chars.len());
            Some(String::from_utf16_lossy(&chars[..end]))
        }
    }
}
