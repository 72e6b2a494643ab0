//! Real input and capture: `rdev` for the pointer and keyboard, `xcap` for
//! pixels, `arboard` for text that has no direct key mapping.

use super::{InputDriver, Key, ScreenSource};
use crate::errors::EngineError;
use crate::geometry::{AbsolutePosition, Rgb, ScreenRegion};
use image::DynamicImage;
use rdev::{Button, EventType};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay between synthesized events; some platforms drop events sent faster.
const EVENT_GAP: Duration = Duration::from_millis(15);
const MOVE_STEP: Duration = Duration::from_millis(10);

fn simulate(event: &EventType) -> Result<(), EngineError> {
    rdev::simulate(event)
        .map_err(|_| EngineError::Platform(format!("could not simulate {event:?}")))
}

fn map_key(key: Key) -> rdev::Key {
    match key {
        Key::Backspace => rdev::Key::Backspace,
    }
}

/// Key and shift state for characters typed directly.
fn char_key(c: char) -> Option<(rdev::Key, bool)> {
    use rdev::Key::*;
    let letters = [
        KeyA, KeyB, KeyC, KeyD, KeyE, KeyF, KeyG, KeyH, KeyI, KeyJ, KeyK, KeyL, KeyM, KeyN, KeyO,
        KeyP, KeyQ, KeyR, KeyS, KeyT, KeyU, KeyV, KeyW, KeyX, KeyY, KeyZ,
    ];
    let digits = [Num0, Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9];
    match c {
        'a'..='z' => Some((letters[(c as u8 - b'a') as usize], false)),
        'A'..='Z' => Some((letters[(c as u8 - b'A') as usize], true)),
        '0'..='9' => Some((digits[(c as u8 - b'0') as usize], false)),
        ' ' => Some((Space, false)),
        '.' => Some((Dot, false)),
        ',' => Some((Comma, false)),
        '-' => Some((Minus, false)),
        _ => None,
    }
}

/// Pointer and keyboard through `rdev`.
pub struct RdevInput {
    last_position: Mutex<Option<AbsolutePosition>>,
}

impl Default for RdevInput {
    fn default() -> Self {
        Self::new()
    }
}

impl RdevInput {
    pub fn new() -> Self {
        Self {
            last_position: Mutex::new(None),
        }
    }

    async fn tap(&self, key: rdev::Key, shift: bool) -> Result<(), EngineError> {
        if shift {
            simulate(&EventType::KeyPress(rdev::Key::ShiftLeft))?;
        }
        simulate(&EventType::KeyPress(key))?;
        tokio::time::sleep(EVENT_GAP).await;
        simulate(&EventType::KeyRelease(key))?;
        if shift {
            simulate(&EventType::KeyRelease(rdev::Key::ShiftLeft))?;
        }
        tokio::time::sleep(EVENT_GAP).await;
        Ok(())
    }

    async fn paste(&self, text: &str) -> Result<(), EngineError> {
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| EngineError::Platform(format!("clipboard unavailable: {e}")))?;
        let previous = clipboard.get_text().ok();
        clipboard
            .set_text(text.to_string())
            .map_err(|e| EngineError::Platform(format!("clipboard write failed: {e}")))?;

        let modifier = if cfg!(target_os = "macos") {
            rdev::Key::MetaLeft
        } else {
            rdev::Key::ControlLeft
        };
        simulate(&EventType::KeyPress(modifier))?;
        self.tap(rdev::Key::KeyV, false).await?;
        simulate(&EventType::KeyRelease(modifier))?;
        tokio::time::sleep(EVENT_GAP).await;

        if let Some(previous) = previous {
            if let Err(e) = clipboard.set_text(previous) {
                debug!("Could not restore clipboard: {}", e);
            }
        }
        Ok(())
    }

    fn remember(&self, position: AbsolutePosition) -> Option<AbsolutePosition> {
        let mut last = self.last_position.lock().unwrap_or_else(|p| p.into_inner());
        last.replace(position)
    }
}

#[async_trait::async_trait]
impl InputDriver for RdevInput {
    async fn move_to(&self, position: AbsolutePosition, travel: Duration) -> Result<(), EngineError> {
        let from = self.remember(position);
        let steps = (travel.as_millis() / MOVE_STEP.as_millis()).max(1) as i32;
        match from {
            Some(from) if steps > 1 => {
                for step in 1..=steps {
                    let x = from.x + (position.x - from.x) * step / steps;
                    let y = from.y + (position.y - from.y) * step / steps;
                    simulate(&EventType::MouseMove {
                        x: x as f64,
                        y: y as f64,
                    })?;
                    tokio::time::sleep(MOVE_STEP).await;
                }
            }
            _ => {
                simulate(&EventType::MouseMove {
                    x: position.x as f64,
                    y: position.y as f64,
                })?;
                tokio::time::sleep(EVENT_GAP).await;
            }
        }
        Ok(())
    }

    async fn click(&self) -> Result<(), EngineError> {
        self.mouse_down().await?;
        self.mouse_up().await
    }

    async fn mouse_down(&self) -> Result<(), EngineError> {
        simulate(&EventType::ButtonPress(Button::Left))?;
        tokio::time::sleep(EVENT_GAP).await;
        Ok(())
    }

    async fn mouse_up(&self) -> Result<(), EngineError> {
        simulate(&EventType::ButtonRelease(Button::Left))?;
        tokio::time::sleep(EVENT_GAP).await;
        Ok(())
    }

    async fn write(&self, text: &str) -> Result<(), EngineError> {
        let keys: Option<Vec<_>> = text.chars().map(char_key).collect();
        match keys {
            Some(keys) => {
                for (key, shift) in keys {
                    self.tap(key, shift).await?;
                }
                Ok(())
            }
            None => self.paste(text).await,
        }
    }

    async fn key_press(&self, key: Key, presses: u32, interval: Duration) -> Result<(), EngineError> {
        let key = map_key(key);
        for _ in 0..presses {
            self.tap(key, false).await?;
            tokio::time::sleep(interval).await;
        }
        Ok(())
    }
}

/// Screen capture through `xcap`.
pub struct XcapScreen;

impl XcapScreen {
    fn monitor_at(x: i32, y: i32) -> Result<(xcap::Monitor, i32, i32), EngineError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| EngineError::Platform(format!("Failed to get monitors: {e}")))?;
        for monitor in monitors {
            let mx = monitor
                .x()
                .map_err(|e| EngineError::Platform(format!("Failed to get monitor x: {e}")))?;
            let my = monitor
                .y()
                .map_err(|e| EngineError::Platform(format!("Failed to get monitor y: {e}")))?;
            let width = monitor
                .width()
                .map_err(|e| EngineError::Platform(format!("Failed to get monitor width: {e}")))?
                as i32;
            let height = monitor
                .height()
                .map_err(|e| EngineError::Platform(format!("Failed to get monitor height: {e}")))?
                as i32;
            if x >= mx && x < mx + width && y >= my && y < my + height {
                return Ok((monitor, mx, my));
            }
        }
        Err(EngineError::Platform(format!("({x}, {y}) is not on any monitor")))
    }
}

impl ScreenSource for XcapScreen {
    fn pixel(&self, position: AbsolutePosition) -> Result<Rgb, EngineError> {
        let (monitor, mx, my) = Self::monitor_at(position.x, position.y)?;
        let capture = monitor
            .capture_region((position.x - mx) as u32, (position.y - my) as u32, 1, 1)
            .map_err(|e| EngineError::Platform(format!("Failed to capture pixel: {e}")))?;
        let [r, g, b, _] = capture.get_pixel(0, 0).0;
        Ok(Rgb(r, g, b))
    }

    fn screenshot(&self, region: ScreenRegion) -> Result<DynamicImage, EngineError> {
        let (monitor, mx, my) = Self::monitor_at(region.left, region.top)?;
        let capture = monitor
            .capture_region(
                (region.left - mx) as u32,
                (region.top - my) as u32,
                region.width,
                region.height,
            )
            .map_err(|e| EngineError::Platform(format!("Failed to capture region: {e}")))?;
        Ok(DynamicImage::ImageRgba8(capture))
    }
}

/// Cancels `token` when Ctrl+Shift+Q is pressed anywhere.
pub fn spawn_abort_listener(token: CancellationToken) {
    thread::spawn(move || {
        let mut ctrl = false;
        let mut shift = false;
        info!("Abort hotkey (Ctrl+Shift+Q) armed");
        if let Err(e) = rdev::listen(move |event: rdev::Event| match event.event_type {
            EventType::KeyPress(rdev::Key::ControlLeft | rdev::Key::ControlRight) => ctrl = true,
            EventType::KeyRelease(rdev::Key::ControlLeft | rdev::Key::ControlRight) => ctrl = false,
            EventType::KeyPress(rdev::Key::ShiftLeft | rdev::Key::ShiftRight) => shift = true,
            EventType::KeyRelease(rdev::Key::ShiftLeft | rdev::Key::ShiftRight) => shift = false,
            EventType::KeyPress(rdev::Key::KeyQ) if ctrl && shift => {
                if !token.is_cancelled() {
                    warn!("Abort hotkey pressed, stopping engines");
                    token.cancel();
                }
            }
            _ => {}
        }) {
            error!("Abort hotkey listener failed: {:?}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_maps_to_keys() {
        assert_eq!(char_key('a'), Some((rdev::Key::KeyA, false)));
        assert_eq!(char_key('Z'), Some((rdev::Key::KeyZ, true)));
        assert_eq!(char_key('7'), Some((rdev::Key::Num7, false)));
        assert_eq!(char_key('ç'), None);
    }
}
