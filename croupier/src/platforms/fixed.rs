use super::AppWindow;
use crate::errors::EngineError;
use crate::geometry::ClientRect;
use std::path::Path;
use std::process::{Child, Command};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// A window at a known, fixed screen placement.
///
/// Used where no native window control exists: the client area is taken from
/// configuration and opening the app means spawning its launcher.
pub struct FixedWindow {
    title: String,
    rect: ClientRect,
    child: Mutex<Option<Child>>,
}

impl FixedWindow {
    pub fn new(title: impl Into<String>, rect: ClientRect) -> Self {
        Self {
            title: title.into(),
            rect,
            child: Mutex::new(None),
        }
    }

    fn child(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl AppWindow for FixedWindow {
    fn title(&self) -> &str {
        &self.title
    }

    fn client_rect(&self) -> Result<ClientRect, EngineError> {
        if self.rect.width == 0 || self.rect.height == 0 {
            return Err(EngineError::WindowNotFound(format!(
                "{} has no configured client area",
                self.title
            )));
        }
        Ok(self.rect)
    }

    fn is_open(&self) -> bool {
        let mut child = self.child();
        match child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!("{} launcher exited with {}", self.title, status);
                *child = None;
                false
            }
            Some(Err(e)) => {
                warn!("Cannot poll {} launcher: {}", self.title, e);
                false
            }
            None => false,
        }
    }

    fn restore_and_focus(&self) -> Result<(), EngineError> {
        debug!("{} is assumed to be visible", self.title);
        Ok(())
    }

    fn minimize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn close(&self) -> Result<(), EngineError> {
        if let Some(mut child) = self.child().take() {
            child.kill()?;
            let _ = child.wait();
            info!("Closed {}", self.title);
        }
        Ok(())
    }

    fn open(&self, launcher: &Path) -> Result<(), EngineError> {
        if !launcher.exists() {
            return Err(EngineError::WindowNotFound(format!(
                "launcher {} not found",
                launcher.display()
            )));
        }
        let child = launch(launcher)?;
        info!("Started {} from {}", self.title, launcher.display());
        *self.child() = Some(child);
        Ok(())
    }
}

#[cfg(target_os = "windows")]
fn launch(launcher: &Path) -> Result<Child, EngineError> {
    Ok(Command::new("cmd")
        .args(["/C", "start", "/WAIT", ""])
        .arg(launcher)
        .spawn()?)
}

#[cfg(not(target_os = "windows"))]
fn launch(launcher: &Path) -> Result<Child, EngineError> {
    Ok(Command::new(launcher).spawn()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_launcher_is_window_not_found() {
        let window = FixedWindow::new("pppoker", ClientRect::default());
        let err = window.open(Path::new("/nonexistent/pppoker.lnk")).unwrap_err();
        assert!(matches!(err, EngineError::WindowNotFound(_)));
        assert!(!window.is_open());
    }

    #[test]
    fn zero_area_is_not_a_window() {
        let window = FixedWindow::new("pppoker", ClientRect::default());
        assert!(window.client_rect().is_err());
        let sized = FixedWindow::new(
            "pppoker",
            ClientRect {
                left: 0,
                top: 0,
                width: 400,
                height: 700,
            },
        );
        assert_eq!(sized.client_rect().unwrap().height, 700);
    }
}
