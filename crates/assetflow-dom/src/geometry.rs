//! Layout geometry: element boxes and the viewport

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in CSS pixels, document coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl Rect {
    /// Create a rectangle
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge
    #[inline]
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge
    #[inline]
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Area (zero for degenerate boxes)
    #[inline]
    #[must_use]
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow the rectangle by `margin` on every side
    #[must_use]
    pub fn expand(&self, margin: f64) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + 2.0 * margin,
            height: self.height + 2.0 * margin,
        }
    }

    /// Overlapping region, `None` when the boxes are disjoint
    ///
    /// Boxes that only share an edge produce a zero-area intersection.
    #[must_use]
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right < left || bottom < top {
            return None;
        }
        Some(Rect::new(left, top, right - left, bottom - top))
    }
}

/// Host viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Layout width in CSS pixels
    pub width: f64,
    /// Layout height in CSS pixels
    pub height: f64,
    /// Device pixel ratio
    pub device_pixel_ratio: f64,
    /// Horizontal scroll offset
    #[serde(default)]
    pub scroll_x: f64,
    /// Vertical scroll offset
    #[serde(default)]
    pub scroll_y: f64,
}

impl Viewport {
    /// Viewport at the top of the page
    #[inline]
    #[must_use]
    pub const fn new(width: f64, height: f64, device_pixel_ratio: f64) -> Self {
        Self {
            width,
            height,
            device_pixel_ratio,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }

    /// Same viewport scrolled to `(x, y)`
    #[inline]
    #[must_use]
    pub fn scrolled_to(mut self, x: f64, y: f64) -> Self {
        self.scroll_x = x;
        self.scroll_y = y;
        self
    }

    /// Visible region in document coordinates
    #[inline]
    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::new(self.scroll_x, self.scroll_y, self.width, self.height)
    }
}

impl Default for Viewport {
    /// 1280×800 at 1x
    fn default() -> Self {
        Self::new(1280.0, 800.0, 1.0)
    }
}
