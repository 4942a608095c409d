//! Error types for the document model and host effects

use crate::element::NodeId;

/// Errors from document mutations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    /// No element with this id
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Insertion would make an element its own ancestor
    #[error("cannot insert {child} under {parent}: would create a cycle")]
    HierarchyRequest {
        /// Requested parent
        parent: NodeId,
        /// Element being inserted
        child: NodeId,
    },

    /// Attribute name is empty or contains whitespace
    #[error("invalid attribute name: '{0}'")]
    InvalidAttribute(String),
}

/// Errors from host network effects
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport-level failure
    #[error("network error for {url}: {message}")]
    Network {
        /// Requested URL
        url: String,
        /// Host-supplied detail
        message: String,
    },

    /// The resource arrived but could not be decoded
    #[error("decode error for {url}: {message}")]
    Decode {
        /// Requested URL
        url: String,
        /// Host-supplied detail
        message: String,
    },
}

impl FetchError {
    /// Create network error for url
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create decode error for url
    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }
}
