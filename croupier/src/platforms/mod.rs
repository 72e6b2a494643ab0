//! Platform collaborators the engine drives.
//!
//! The engine never talks to the OS directly; it goes through these traits so
//! that every replay path can run against scripted doubles in tests and
//! against real devices behind the `desktop`/`ocr` features.

use crate::errors::EngineError;
use crate::geometry::{AbsolutePosition, ClientRect, RelativePosition, Rgb, ScreenRegion};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "desktop")]
pub mod desktop;
pub mod fixed;
#[cfg(feature = "ocr")]
pub mod ocr;
#[cfg(target_os = "windows")]
pub mod windows;

/// Keys the engine needs to press on its own. Clearing a field before
/// writing is the only one so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Backspace,
}

/// Page-segmentation hint handed to the recognizer, set with `ocr_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionMode {
    /// One uniform block of text, read line by line.
    #[default]
    SingleBlock,
    SingleLine,
    /// Let the backend segment the page.
    Auto,
}

/// Pointer and keyboard simulation. Single writer, system wide.
#[async_trait::async_trait]
pub trait InputDriver: Send + Sync {
    /// Moves the pointer, travelling for roughly `travel`.
    async fn move_to(&self, position: AbsolutePosition, travel: Duration) -> Result<(), EngineError>;

    async fn click(&self) -> Result<(), EngineError>;

    async fn mouse_down(&self) -> Result<(), EngineError>;

    async fn mouse_up(&self) -> Result<(), EngineError>;

    /// Types text into the focused control.
    async fn write(&self, text: &str) -> Result<(), EngineError>;

    async fn key_press(&self, key: Key, presses: u32, interval: Duration) -> Result<(), EngineError>;
}

/// Pixel sampling and region capture.
pub trait ScreenSource: Send + Sync {
    fn pixel(&self, position: AbsolutePosition) -> Result<Rgb, EngineError>;

    fn screenshot(&self, region: ScreenRegion) -> Result<DynamicImage, EngineError>;
}

/// Text recognition over an already prepared image.
#[async_trait::async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn extract_text(
        &self,
        image: &DynamicImage,
        mode: RecognitionMode,
    ) -> Result<String, EngineError>;
}

/// The target application's top-level window.
pub trait AppWindow: Send + Sync {
    fn title(&self) -> &str;

    /// Current screen placement of the client area.
    fn client_rect(&self) -> Result<ClientRect, EngineError>;

    fn is_open(&self) -> bool;

    fn restore_and_focus(&self) -> Result<(), EngineError>;

    fn minimize(&self) -> Result<(), EngineError>;

    /// Asks the application to close. It may keep running for a while.
    fn close(&self) -> Result<(), EngineError>;

    /// Ends the application's process. Backends without a separate
    /// forced path fall back to [`AppWindow::close`].
    fn terminate(&self) -> Result<(), EngineError> {
        self.close()
    }

    /// Attaches to a running instance or starts one from `launcher`.
    fn open(&self, launcher: &Path) -> Result<(), EngineError>;

    fn relative_position(&self, position: AbsolutePosition) -> Result<RelativePosition, EngineError> {
        Ok(self.client_rect()?.to_relative(position))
    }

    fn absolute_position(&self, position: RelativePosition) -> Result<AbsolutePosition, EngineError> {
        Ok(self.client_rect()?.to_absolute(position))
    }
}

/// Everything an engine needs to touch the screen for one application.
#[derive(Clone)]
pub struct Platform {
    pub input: Arc<dyn InputDriver>,
    pub screen: Arc<dyn ScreenSource>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub window: Arc<dyn AppWindow>,
}

impl Platform {
    pub fn new(
        input: Arc<dyn InputDriver>,
        screen: Arc<dyn ScreenSource>,
        recognizer: Arc<dyn TextRecognizer>,
        window: Arc<dyn AppWindow>,
    ) -> Self {
        Self {
            input,
            screen,
            recognizer,
            window,
        }
    }
}

/// Recognizer used when no OCR backend is compiled in. Every read fails,
/// which the text reader turns into an empty string after its retries.
pub struct UnavailableRecognizer;

#[async_trait::async_trait]
impl TextRecognizer for UnavailableRecognizer {
    async fn extract_text(
        &self,
        _image: &DynamicImage,
        _mode: RecognitionMode,
    ) -> Result<String, EngineError> {
        Err(EngineError::Platform(
            "no OCR backend compiled in (enable the `ocr` feature)".to_string(),
        ))
    }
}
