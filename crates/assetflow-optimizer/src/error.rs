//! Optimizer error types

use crate::record::AssetStatus;
use assetflow_dom::DomError;
use assetflow_image::ImageError;

/// Asset optimization failures
///
/// Per-asset failures are recorded on the asset and logged; only
/// construction errors reach callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OptimizeError {
    /// A classification pattern did not compile
    #[error("invalid classification pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Status change would move backwards or out of a terminal state
    #[error("asset '{url}' cannot move from {from} to {to}")]
    IllegalStatus {
        /// Asset URL
        url: String,
        /// Current status
        from: AssetStatus,
        /// Requested status
        to: AssetStatus,
    },

    /// No record for the URL
    #[error("no asset record for '{0}'")]
    UnknownAsset(String),

    /// Rewriting the element failed
    #[error(transparent)]
    Dom(#[from] DomError),

    /// Handing the image to the lazy pipeline failed
    #[error(transparent)]
    Image(#[from] ImageError),
}
