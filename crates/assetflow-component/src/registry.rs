//! Identity-keyed component factories

use assetflow_dom::{Document, NodeId};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A loaded component implementation
pub trait Component: Send + Sync {
    /// Build the component's subtree inside `container`
    ///
    /// # Errors
    /// Any error leaves the container showing the failure placeholder.
    fn render(&self, document: &Document, container: NodeId) -> anyhow::Result<()>;
}

/// Shared component implementation
pub type SharedComponent = Arc<dyn Component>;

pub(crate) type Factory = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<SharedComponent>> + Send + Sync>;

/// Stateless factories, one per identity
///
/// Factories carry no caching of their own; deduplication lives in the
/// loader that calls them.
#[derive(Default)]
pub struct ComponentRegistry {
    factories: RwLock<BTreeMap<String, Factory>>,
}

impl ComponentRegistry {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `identity`
    pub fn register<F, Fut>(&self, identity: impl Into<String>, factory: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<SharedComponent>> + Send + 'static,
    {
        let identity = identity.into();
        tracing::debug!(%identity, "component registered");
        let factory: Factory = Arc::new(move || factory().boxed());
        self.factories.write().insert(identity, factory);
    }

    /// Whether `identity` has a factory
    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.factories.read().contains_key(identity)
    }

    /// Registered identities, sorted
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    pub(crate) fn factory(&self, identity: &str) -> Option<Factory> {
        self.factories.read().get(identity).cloned()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("identities", &self.identities())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl Component for Empty {
        fn render(&self, _: &Document, _: NodeId) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn factories_are_looked_up_by_identity() {
        let registry = ComponentRegistry::new();
        registry.register("gallery", || async { Ok(Arc::new(Empty) as SharedComponent) });

        assert!(registry.contains("gallery"));
        assert!(!registry.contains("carousel"));
        assert_eq!(registry.identities(), vec!["gallery".to_string()]);

        let factory = registry.factory("gallery").unwrap();
        assert!(factory().await.is_ok());
    }
}
