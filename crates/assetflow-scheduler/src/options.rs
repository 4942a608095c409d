//! Registration options and signal modes

use assetflow_dom::Rect;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-registration proximity settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveOptions {
    /// Distance (CSS px) around the viewport that already counts as visible
    pub root_margin: f64,
    /// Fraction of the target's area that must intersect, `0.0..=1.0`
    pub threshold: f64,
}

impl ObserveOptions {
    /// With root margin
    #[inline]
    #[must_use]
    pub fn with_root_margin(mut self, root_margin: f64) -> Self {
        self.root_margin = root_margin;
        self
    }

    /// With threshold
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Whether `target` is near enough to `root` to fire
    ///
    /// `root` is the unexpanded viewport; the root margin is applied here.
    /// Zero-area targets count once they touch the expanded viewport.
    #[must_use]
    pub fn is_visible(&self, target: &Rect, root: &Rect) -> bool {
        let Some(overlap) = target.intersection(&root.expand(self.root_margin)) else {
            return false;
        };
        let area = target.area();
        if area <= 0.0 {
            return true;
        }
        overlap.area() / area >= self.threshold
    }
}

impl Default for ObserveOptions {
    /// 50 px margin, 1 % threshold
    fn default() -> Self {
        Self {
            root_margin: 50.0,
            threshold: 0.01,
        }
    }
}

/// How the scheduler learns about visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    /// The host pushes intersection updates through
    /// [`VisibilityScheduler::notify`](crate::VisibilityScheduler::notify)
    Native,
    /// The scheduler samples a layout source on an interval
    Polling {
        /// Time between samples
        interval: Duration,
    },
    /// No visibility signal: every target fires immediately
    Unavailable,
}

impl SignalMode {
    /// Whether `observe` fires without waiting for a signal
    #[inline]
    #[must_use]
    pub fn is_eager(&self) -> bool {
        matches!(self, SignalMode::Unavailable)
    }
}
