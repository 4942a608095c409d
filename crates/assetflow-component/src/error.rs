//! Component error types

use assetflow_cache::LoadError;
use assetflow_dom::{DomError, NodeId};

/// Lazy component failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComponentError {
    /// Container has no `data-component` attribute
    #[error("element {0} has no data-component identity")]
    MissingIdentity(NodeId),

    /// No factory registered for the identity
    #[error("no component registered as '{0}'")]
    Unregistered(String),

    /// The factory failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Document access failed
    #[error(transparent)]
    Dom(#[from] DomError),
}
