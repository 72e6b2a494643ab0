//! Native window control on Windows.

use super::AppWindow;
use crate::errors::EngineError;
use crate::geometry::ClientRect;
use std::ffi::c_void;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use tracing::{debug, info};
use windows::Win32::Foundation::{
    CloseHandle, BOOL, FALSE, HWND, LPARAM, POINT, RECT, TRUE, WPARAM,
};
use windows::Win32::Graphics::Gdi::ClientToScreen;
use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClientRect, GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId,
    IsIconic, IsWindow, IsWindowVisible, PostMessageW, SetForegroundWindow, ShowWindow,
    SW_MINIMIZE, SW_RESTORE, WM_CLOSE,
};

struct TitleSearch {
    needle: String,
    found: Option<isize>,
}

unsafe extern "system" fn match_title(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = &mut *(lparam.0 as *mut TitleSearch);
    if !IsWindowVisible(hwnd).as_bool() {
        return TRUE;
    }
    let mut buffer = [0u16; 512];
    let len = GetWindowTextW(hwnd, &mut buffer);
    if len > 0 {
        let title = String::from_utf16_lossy(&buffer[..len as usize]);
        if title.to_lowercase().contains(&search.needle) {
            search.found = Some(hwnd.0 as isize);
            return FALSE;
        }
    }
    TRUE
}

/// A top-level window located by a case-insensitive title fragment.
pub struct Win32Window {
    title: String,
    handle: Mutex<Option<isize>>,
}

impl Win32Window {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            handle: Mutex::new(None),
        }
    }

    fn find(&self) -> Option<isize> {
        let mut search = TitleSearch {
            needle: self.title.to_lowercase(),
            found: None,
        };
        // Stopping the enumeration early reports an error; the result is in `search`.
        let _ = unsafe { EnumWindows(Some(match_title), LPARAM(&mut search as *mut _ as isize)) };
        search.found
    }

    fn hwnd(&self) -> Result<HWND, EngineError> {
        let mut cached = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(raw) = *cached {
            let hwnd = HWND(raw as *mut c_void);
            if unsafe { IsWindow(hwnd) }.as_bool() {
                return Ok(hwnd);
            }
        }
        let raw = self
            .find()
            .ok_or_else(|| EngineError::WindowNotFound(self.title.clone()))?;
        debug!("Found window '{}' ({:#x})", self.title, raw);
        *cached = Some(raw);
        Ok(HWND(raw as *mut c_void))
    }
}

impl AppWindow for Win32Window {
    fn title(&self) -> &str {
        &self.title
    }

    fn client_rect(&self) -> Result<ClientRect, EngineError> {
        let hwnd = self.hwnd()?;
        let mut rect = RECT::default();
        let mut origin = POINT { x: 0, y: 0 };
        unsafe {
            GetClientRect(hwnd, &mut rect)
                .map_err(|e| EngineError::Platform(format!("GetClientRect failed: {e}")))?;
            if !ClientToScreen(hwnd, &mut origin).as_bool() {
                return Err(EngineError::Platform("ClientToScreen failed".to_string()));
            }
        }
        Ok(ClientRect {
            left: origin.x,
            top: origin.y,
            width: (rect.right - rect.left).max(0) as u32,
            height: (rect.bottom - rect.top).max(0) as u32,
        })
    }

    fn is_open(&self) -> bool {
        self.hwnd().is_ok()
    }

    fn restore_and_focus(&self) -> Result<(), EngineError> {
        let hwnd = self.hwnd()?;
        unsafe {
            if IsIconic(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
            }
            if GetForegroundWindow() != hwnd && !SetForegroundWindow(hwnd).as_bool() {
                debug!("SetForegroundWindow failed for '{}', continuing", self.title);
            }
        }
        Ok(())
    }

    fn minimize(&self) -> Result<(), EngineError> {
        let hwnd = self.hwnd()?;
        unsafe {
            let _ = ShowWindow(hwnd, SW_MINIMIZE);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        let Ok(hwnd) = self.hwnd() else {
            return Ok(());
        };
        unsafe { PostMessageW(hwnd, WM_CLOSE, WPARAM(0), LPARAM(0)) }
            .map_err(|e| EngineError::Platform(format!("WM_CLOSE failed: {e}")))?;
        *self.handle.lock().unwrap_or_else(|p| p.into_inner()) = None;
        info!("Asked '{}' to close", self.title);
        Ok(())
    }

    fn terminate(&self) -> Result<(), EngineError> {
        let Ok(hwnd) = self.hwnd() else {
            return Ok(());
        };
        let mut pid = 0u32;
        unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid as *mut u32)) };
        if pid == 0 {
            return Err(EngineError::Platform(format!(
                "no process owns '{}'",
                self.title
            )));
        }
        unsafe {
            let process = OpenProcess(PROCESS_TERMINATE, false, pid)
                .map_err(|e| EngineError::Platform(format!("OpenProcess({pid}) failed: {e}")))?;
            let result = TerminateProcess(process, 1);
            let _ = CloseHandle(process);
            result.map_err(|e| EngineError::Platform(format!("TerminateProcess({pid}) failed: {e}")))?;
        }
        *self.handle.lock().unwrap_or_else(|p| p.into_inner()) = None;
        info!("Terminated '{}' (pid {})", self.title, pid);
        Ok(())
    }

    /// Spawns the launcher and returns without waiting; the caller polls
    /// [`AppWindow::is_open`] until the window shows up.
    fn open(&self, launcher: &Path) -> Result<(), EngineError> {
        if self.is_open() {
            debug!("'{}' is already running", self.title);
            return Ok(());
        }
        if !launcher.exists() {
            return Err(EngineError::WindowNotFound(format!(
                "launcher {} not found",
                launcher.display()
            )));
        }
        Command::new("cmd")
            .args(["/C", "start", ""])
            .arg(launcher)
            .spawn()?;
        info!("Launched '{}' from {}", self.title, launcher.display());
        Ok(())
    }
}
