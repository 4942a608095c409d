//! Image error types

use crate::state::ImageState;
use assetflow_dom::{DomError, NodeId};

/// Responsive resolution failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    /// The descriptor list yielded no usable candidate
    #[error("descriptor list has no usable candidates")]
    NoCandidates,

    /// Viewport width or pixel ratio is not a positive number
    #[error("invalid viewport: width {width}, device pixel ratio {dpr}")]
    InvalidViewport {
        /// Requested width
        width: f64,
        /// Requested pixel ratio
        dpr: f64,
    },
}

/// Lazy image pipeline failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImageError {
    /// Element carries neither a source nor usable descriptors
    #[error("element {0} has no image source")]
    NoSource(NodeId),

    /// Transition rejected by the image state table
    #[error("illegal image state transition: {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: ImageState,
        /// Requested state
        to: ImageState,
    },

    /// Document access failed
    #[error(transparent)]
    Dom(#[from] DomError),
}

impl ImageError {
    /// Create illegal transition error
    #[inline]
    #[must_use]
    pub fn illegal_transition(from: ImageState, to: ImageState) -> Self {
        Self::IllegalTransition { from, to }
    }
}
