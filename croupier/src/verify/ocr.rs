use crate::cancellation::{pause, with_cancellation};
use crate::errors::EngineError;
use crate::geometry::ScreenRegion;
use crate::platforms::{RecognitionMode, ScreenSource, TextRecognizer};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 3x3 sharpening kernel, normalized by its sum (16).
const SHARPEN_KERNEL: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];

/// Best-effort text extraction over a screen region.
#[derive(Clone)]
pub struct TextReader {
    screen: Arc<dyn ScreenSource>,
    recognizer: Arc<dyn TextRecognizer>,
    attempts: u32,
    retry_delay: Duration,
    mode: RecognitionMode,
    capture_dir: Option<PathBuf>,
}

impl TextReader {
    pub fn new(
        screen: Arc<dyn ScreenSource>,
        recognizer: Arc<dyn TextRecognizer>,
        attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            screen,
            recognizer,
            attempts: attempts.max(1),
            retry_delay,
            mode: RecognitionMode::SingleBlock,
            capture_dir: None,
        }
    }

    /// Segmentation hint passed to the recognizer on every read.
    pub fn with_mode(mut self, mode: RecognitionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Saves raw and sharpened captures under `<dir>/read` and `<dir>/treated`.
    pub fn with_capture_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.capture_dir = dir;
        self
    }

    /// Reads the region, retrying on empty output or recognizer failure.
    ///
    /// Never fails on recognition problems: after the last attempt the result
    /// is an empty string. Only cancellation is reported as an error, and it
    /// interrupts a recognition already in progress.
    /// `label` is `(app, operation)` and names debug captures.
    pub async fn read(
        &self,
        region: ScreenRegion,
        label: (&str, &str),
        token: &CancellationToken,
    ) -> Result<String, EngineError> {
        for attempt in 1..=self.attempts {
            match self.read_once(region, label, token).await {
                Err(e) if e.is_cancelled() => return Err(e),
                Ok(text) if !text.trim().is_empty() => {
                    debug!("OCR read '{}' from {:?}", text.trim(), region);
                    return Ok(text.trim().to_string());
                }
                Ok(_) => debug!("OCR returned nothing on attempt {}/{}", attempt, self.attempts),
                Err(e) => warn!("OCR failed on attempt {}/{}: {}", attempt, self.attempts, e),
            }
            if attempt < self.attempts {
                pause(token, self.retry_delay).await?;
            }
        }
        warn!("OCR gave up on {:?} after {} attempts", region, self.attempts);
        Ok(String::new())
    }

    async fn read_once(
        &self,
        region: ScreenRegion,
        label: (&str, &str),
        token: &CancellationToken,
    ) -> Result<String, EngineError> {
        if region.is_empty() {
            return Err(EngineError::Platform(format!("empty capture region {region:?}")));
        }
        let raw = self.screen.screenshot(region)?;
        let treated = prepare(&raw);
        if let Some(dir) = &self.capture_dir {
            save_capture(dir, "read", label, &raw);
            save_capture(dir, "treated", label, &treated);
        }
        with_cancellation(token, self.recognizer.extract_text(&treated, self.mode)).await
    }
}

/// Sharpens and converts to 8-bit RGB before recognition.
pub fn prepare(image: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageRgb8(image.filter3x3(&SHARPEN_KERNEL).to_rgb8())
}

fn save_capture(dir: &Path, stage: &str, (app, operation): (&str, &str), image: &DynamicImage) {
    let folder = dir.join(stage).join(app);
    let path = folder.join(format!("{operation}.png"));
    let result = std::fs::create_dir_all(&folder)
        .map_err(|e| e.to_string())
        .and_then(|_| image.save(&path).map_err(|e| e.to_string()));
    if let Err(e) = result {
        warn!("Could not save OCR capture {}: {}", path.display(), e);
    }
}
