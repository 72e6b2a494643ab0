//! Coordinate types shared by recorded commands and platform collaborators.
//!
//! Recorded positions are fractions of the target window's client area so a
//! mapping survives window moves and resolution changes. Absolute pixels only
//! exist at dispatch time, computed from the live [`ClientRect`].

use serde::{Deserialize, Serialize};

/// A point expressed as a fraction of the client area (`[x, y]` on disk).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativePosition(pub f64, pub f64);

impl RelativePosition {
    pub fn x(&self) -> f64 {
        self.0
    }

    pub fn y(&self) -> f64 {
        self.1
    }
}

/// Two corners of a rectangle in relative coordinates (`[[x0, y0], [x1, y1]]` on disk).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeArea(pub RelativePosition, pub RelativePosition);

impl RelativeArea {
    pub fn start(&self) -> RelativePosition {
        self.0
    }

    pub fn end(&self) -> RelativePosition {
        self.1
    }

    /// The same area moved vertically so that its top edge sits at `top`.
    pub fn with_top(&self, top: f64) -> RelativeArea {
        let height = self.1 .1 - self.0 .1;
        RelativeArea(
            RelativePosition(self.0 .0, top),
            RelativePosition(self.1 .0, top + height),
        )
    }

    /// Corner-wise sum, used to place an area recorded relative to another one.
    pub fn offset_by(&self, delta: &RelativeArea) -> RelativeArea {
        RelativeArea(
            RelativePosition(self.0 .0 + delta.0 .0, self.0 .1 + delta.0 .1),
            RelativePosition(self.1 .0 + delta.1 .0, self.1 .1 + delta.1 .1),
        )
    }

    /// Corner-wise difference, the inverse of [`RelativeArea::offset_by`].
    pub fn relative_to(&self, origin: &RelativeArea) -> RelativeArea {
        RelativeArea(
            RelativePosition(self.0 .0 - origin.0 .0, self.0 .1 - origin.0 .1),
            RelativePosition(self.1 .0 - origin.1 .0, self.1 .1 - origin.1 .1),
        )
    }

    pub fn center(&self) -> RelativePosition {
        RelativePosition((self.0 .0 + self.1 .0) / 2.0, (self.0 .1 + self.1 .1) / 2.0)
    }
}

/// A point in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsolutePosition {
    pub x: i32,
    pub y: i32,
}

impl AbsolutePosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A normalized screen rectangle (left/top corner plus size), ready for capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRegion {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRegion {
    /// Orders two arbitrary corners into left/top/right/bottom.
    pub fn from_corners(a: AbsolutePosition, b: AbsolutePosition) -> Self {
        let left = a.x.min(b.x);
        let top = a.y.min(b.y);
        let right = a.x.max(b.x);
        let bottom = a.y.max(b.y);
        Self {
            left,
            top,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        }
    }

    pub fn top_left(&self) -> AbsolutePosition {
        AbsolutePosition::new(self.left, self.top)
    }

    pub fn bottom_right(&self) -> AbsolutePosition {
        AbsolutePosition::new(self.left + self.width as i32, self.top + self.height as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// An RGB pixel color (`[r, g, b]` on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn channels(&self) -> [u8; 3] {
        [self.0, self.1, self.2]
    }
}

/// Screen placement of a window's client area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl ClientRect {
    pub fn to_absolute(&self, position: RelativePosition) -> AbsolutePosition {
        AbsolutePosition {
            x: (position.0 * self.width as f64) as i32 + self.left,
            y: (position.1 * self.height as f64) as i32 + self.top,
        }
    }

    /// Returns `(0, 0)` while the client area has no size.
    pub fn to_relative(&self, position: AbsolutePosition) -> RelativePosition {
        if self.width == 0 || self.height == 0 {
            return RelativePosition(0.0, 0.0);
        }
        RelativePosition(
            (position.x - self.left) as f64 / self.width as f64,
            (position.y - self.top) as f64 / self.height as f64,
        )
    }

    pub fn to_region(&self, area: &RelativeArea) -> ScreenRegion {
        ScreenRegion::from_corners(self.to_absolute(area.0), self.to_absolute(area.1))
    }
}
