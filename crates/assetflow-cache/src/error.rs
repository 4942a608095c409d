//! Error types for capability probing and single-flight loading

use std::sync::Arc;

/// Errors from a [`CapabilityProbe`](crate::CapabilityProbe)
///
/// Never surfaced past [`CapabilityCache`](crate::CapabilityCache): a failed
/// probe is cached as "unsupported".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The probe has no way to answer for this feature
    #[error("no probe available for feature: {0}")]
    Unknown(String),

    /// The runtime check itself failed
    #[error("probe for {feature} failed: {message}")]
    Failed {
        /// Feature being probed
        feature: String,
        /// Failure detail
        message: String,
    },
}

impl ProbeError {
    /// Create probe failure for feature
    pub fn failed(feature: impl ToString, message: impl Into<String>) -> Self {
        Self::Failed {
            feature: feature.to_string(),
            message: message.into(),
        }
    }
}

/// A failed single-flight load
///
/// Cloned to every waiter of the failed attempt; all clones share the same
/// underlying cause.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to load '{identity}': {message}")]
pub struct LoadError {
    identity: String,
    message: String,
    cause: Arc<anyhow::Error>,
}

impl LoadError {
    /// Wrap a loader failure for `identity`
    pub fn new(identity: impl Into<String>, cause: anyhow::Error) -> Self {
        Self {
            identity: identity.into(),
            message: format!("{cause:#}"),
            cause: Arc::new(cause),
        }
    }

    /// Identity whose load failed
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Rendered cause chain
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Underlying loader error
    #[inline]
    #[must_use]
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Whether two errors came from the same failed attempt
    #[inline]
    #[must_use]
    pub fn same_attempt(&self, other: &LoadError) -> bool {
        Arc::ptr_eq(&self.cause, &other.cause)
    }
}

impl PartialEq for LoadError {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity && self.message == other.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_display_includes_cause_chain() {
        let cause = anyhow::anyhow!("connection reset").context("fetching chunk");
        let err = LoadError::new("gallery", cause);
        assert_eq!(
            err.to_string(),
            "failed to load 'gallery': fetching chunk: connection reset"
        );
        assert_eq!(err.identity(), "gallery");
    }

    #[test]
    fn clones_share_the_attempt() {
        let err = LoadError::new("a", anyhow::anyhow!("boom"));
        let clone = err.clone();
        assert!(err.same_attempt(&clone));
        let other = LoadError::new("a", anyhow::anyhow!("boom"));
        assert!(!err.same_attempt(&other));
        assert_eq!(err, other);
    }
}
