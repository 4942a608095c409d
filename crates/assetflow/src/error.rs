//! Error types for the assembled pipeline

use assetflow_component::ComponentError;
use assetflow_dom::DomError;
use assetflow_image::{ImageError, ResolveError};
use assetflow_optimizer::OptimizeError;
use std::path::PathBuf;

/// Configuration could not be read or is out of range
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Requested file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Not valid TOML for the expected shape
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted field path, e.g. `visibility.threshold`
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    /// Create out-of-range error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by [`Pipeline`](crate::Pipeline) entry points
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Bad configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Optimizer could not be built
    #[error("optimizer error: {0}")]
    Optimize(#[from] OptimizeError),

    /// Image element rejected
    #[error("image error: {0}")]
    Image(#[from] ImageError),

    /// Component placeholder or load rejected
    #[error("component error: {0}")]
    Component(#[from] ComponentError),

    /// No source could be resolved
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Document mutation failed
    #[error("document error: {0}")]
    Dom(#[from] DomError),
}

impl PipelineError {
    /// Whether the error comes from configuration rather than the document
    #[inline]
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_names_the_field() {
        let err = ConfigError::invalid("visibility.threshold", "must be within [0, 1], got 2");
        assert_eq!(
            err.to_string(),
            "invalid value for visibility.threshold: must be within [0, 1], got 2"
        );
        assert!(PipelineError::from(err).is_config());
    }
}
