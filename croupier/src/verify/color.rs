use crate::cancellation::pause;
use crate::errors::EngineError;
use crate::geometry::{AbsolutePosition, Rgb};
use crate::platforms::ScreenSource;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTolerance {
    pub per_channel: u16,
    pub total: u16,
}

impl Default for ColorTolerance {
    fn default() -> Self {
        Self {
            per_channel: 10,
            total: 20,
        }
    }
}

/// True when every channel is within `per_channel` and the summed
/// difference is within `total`.
pub fn color_match(observed: Rgb, expected: Rgb, tolerance: ColorTolerance) -> bool {
    let mut total = 0u16;
    for (a, b) in observed.channels().into_iter().zip(expected.channels()) {
        let diff = u16::from(a.abs_diff(b));
        if diff > tolerance.per_channel {
            return false;
        }
        total += diff;
    }
    total <= tolerance.total
}

/// Polling policy for a color wait.
#[derive(Debug, Clone, Copy)]
pub struct ColorWait {
    pub tolerance: ColorTolerance,
    pub attempts: u32,
    pub interval: Duration,
}

impl ColorWait {
    /// Polls the pixel until it matches or the attempts run out.
    ///
    /// Returns `Ok(false)` on exhaustion; deciding whether that is fatal is
    /// left to the caller. Sampling errors count as a miss.
    pub async fn wait(
        &self,
        screen: &dyn ScreenSource,
        position: AbsolutePosition,
        expected: Rgb,
        token: &CancellationToken,
    ) -> Result<bool, EngineError> {
        for attempt in 1..=self.attempts.max(1) {
            match screen.pixel(position) {
                Ok(observed) if color_match(observed, expected, self.tolerance) => {
                    debug!(
                        "Color {:?} matched at ({}, {}) on attempt {}",
                        expected, position.x, position.y, attempt
                    );
                    return Ok(true);
                }
                Ok(observed) => {
                    debug!(
                        "Color at ({}, {}) is {:?}, expected {:?} (attempt {}/{})",
                        position.x, position.y, observed, expected, attempt, self.attempts
                    );
                }
                Err(e) => warn!("Pixel sample failed on attempt {}: {}", attempt, e),
            }
            if attempt < self.attempts {
                pause(token, self.interval).await?;
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_bounds_match() {
        let tol = ColorTolerance::default();
        assert!(color_match(Rgb(110, 100, 100), Rgb(100, 100, 100), tol));
        assert!(color_match(Rgb(110, 110, 100), Rgb(100, 100, 100), tol));
        assert!(color_match(Rgb(90, 110, 100), Rgb(100, 100, 100), tol));
    }

    #[test]
    fn one_past_either_bound_fails() {
        let tol = ColorTolerance::default();
        assert!(!color_match(Rgb(111, 100, 100), Rgb(100, 100, 100), tol));
        assert!(!color_match(Rgb(110, 110, 101), Rgb(100, 100, 100), tol));
        assert!(!color_match(Rgb(107, 107, 107), Rgb(100, 100, 100), tol));
    }

    #[test]
    fn saturated_channels_do_not_overflow() {
        let tol = ColorTolerance::default();
        assert!(!color_match(Rgb(255, 255, 255), Rgb(0, 0, 0), tol));
        assert!(color_match(Rgb(255, 0, 0), Rgb(250, 0, 0), tol));
    }
}
