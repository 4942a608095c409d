//! Visibility-deferred mounting

use crate::error::ComponentError;
use crate::registry::{ComponentRegistry, SharedComponent};
use assetflow_cache::{LoadStatus, SingleFlight, Subscription};
use assetflow_dom::{Document, DomError, NodeId, Tag};
use assetflow_scheduler::{ObserveOptions, VisibilityScheduler};
use assetflow_telemetry::Telemetry;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Telemetry operation name for component loads
pub const COMPONENT_LOAD_OPERATION: &str = "component.load";

/// Attribute naming the component a placeholder stands for
pub const COMPONENT_ATTRIBUTE: &str = "data-component";

/// Class of the element rendered when a component fails
pub const ERROR_PLACEHOLDER_CLASS: &str = "component-error";

/// Mount progress of one placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountState {
    /// Waiting to become visible
    Pending,
    /// Implementation loading
    Loading,
    /// Rendered
    Mounted,
    /// Failure placeholder shown
    Failed,
}

impl MountState {
    /// Lowercase name, as serialized
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Loading => "loading",
            Self::Mounted => "mounted",
            Self::Failed => "failed",
        }
    }
}

struct Inner {
    document: Document,
    scheduler: VisibilityScheduler,
    registry: Arc<ComponentRegistry>,
    loader: SingleFlight<String, SharedComponent>,
    telemetry: Telemetry,
    options: ObserveOptions,
    runtime: Option<Handle>,
    mounts: DashMap<NodeId, MountState>,
    loading: watch::Sender<usize>,
}

/// Mounts placeholders once visible, loading each identity once
///
/// Cheap to clone; clones share the mount and load tables.
#[derive(Clone)]
pub struct LazyComponents {
    inner: Arc<Inner>,
}

impl LazyComponents {
    /// Create pipeline
    #[must_use]
    pub fn new(
        document: Document,
        scheduler: VisibilityScheduler,
        registry: Arc<ComponentRegistry>,
        telemetry: Telemetry,
        options: ObserveOptions,
    ) -> Self {
        let (loading, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                document,
                scheduler,
                registry,
                loader: SingleFlight::new(),
                telemetry,
                options,
                runtime: Handle::try_current().ok(),
                mounts: DashMap::new(),
                loading,
            }),
        }
    }

    /// Factory registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.inner.registry
    }

    /// Defer mounting `container` until it is visible
    ///
    /// Mounting a pending, loading or mounted container again is a no-op that
    /// returns its state; mounting a failed one retries.
    ///
    /// # Errors
    /// - [`ComponentError::Dom`] if the element is unknown
    /// - [`ComponentError::MissingIdentity`] without `data-component`
    /// - [`ComponentError::Unregistered`] for an unknown identity
    pub fn mount(&self, container: NodeId) -> Result<MountState, ComponentError> {
        let document = &self.inner.document;
        let element = document.element(container).ok_or(DomError::UnknownNode(container))?;
        let identity = element
            .attribute(COMPONENT_ATTRIBUTE)
            .filter(|identity| !identity.is_empty())
            .ok_or(ComponentError::MissingIdentity(container))?
            .to_string();
        if !self.inner.registry.contains(&identity) {
            return Err(ComponentError::Unregistered(identity));
        }

        match self.inner.mounts.entry(container) {
            Entry::Vacant(slot) => {
                slot.insert(MountState::Pending);
            }
            Entry::Occupied(mut slot) => match *slot.get() {
                MountState::Failed => {
                    tracing::debug!(%container, %identity, "retrying failed mount");
                    slot.insert(MountState::Pending);
                }
                current => return Ok(current),
            },
        }

        self.clear_failure(container)?;
        document.add_class(container, "loading")?;

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.scheduler.observe(container, self.inner.options, move |target| {
            if let Some(inner) = weak.upgrade() {
                LazyComponents { inner }.on_visible(target, identity);
            }
        });
        Ok(self.state(container).unwrap_or(MountState::Pending))
    }

    fn clear_failure(&self, container: NodeId) -> Result<(), DomError> {
        let document = &self.inner.document;
        document.remove_class(container, "error")?;
        let placeholders: Vec<NodeId> = document
            .element(container)
            .map(|element| element.children().to_vec())
            .unwrap_or_default()
            .into_iter()
            .filter(|child| document.has_class(*child, ERROR_PLACEHOLDER_CLASS))
            .collect();
        for placeholder in placeholders {
            document.detach(placeholder)?;
        }
        Ok(())
    }

    /// Start loading `identity` without a placeholder
    ///
    /// # Errors
    /// [`ComponentError::Unregistered`] for an unknown identity
    pub fn preload(&self, identity: &str) -> Result<LoadStatus, ComponentError> {
        drop(self.request(identity)?);
        Ok(self.status(identity))
    }

    /// Shared implementation for `identity`
    ///
    /// Concurrent calls share one factory invocation and one outcome.
    ///
    /// # Errors
    /// - [`ComponentError::Unregistered`] for an unknown identity
    /// - [`ComponentError::Load`] if the factory failed
    pub async fn load(&self, identity: &str) -> Result<SharedComponent, ComponentError> {
        Ok(self.request(identity)?.await?)
    }

    fn request(&self, identity: &str) -> Result<Subscription<SharedComponent>, ComponentError> {
        let factory = self
            .inner
            .registry
            .factory(identity)
            .ok_or_else(|| ComponentError::Unregistered(identity.to_string()))?;
        Ok(self.inner.loader.load(identity.to_string(), move || factory()))
    }

    /// Load status of `identity`
    #[must_use]
    pub fn status(&self, identity: &str) -> LoadStatus {
        self.inner.loader.status(&identity.to_string())
    }

    /// Requests waiting on the in-flight load of `identity`
    #[must_use]
    pub fn waiters(&self, identity: &str) -> usize {
        self.inner.loader.waiters(&identity.to_string())
    }

    /// Forget a loaded implementation so the next request reloads it
    pub fn invalidate(&self, identity: &str) -> bool {
        self.inner.loader.invalidate(&identity.to_string())
    }

    /// Mount state of `container`
    #[must_use]
    pub fn state(&self, container: NodeId) -> Option<MountState> {
        self.inner.mounts.get(&container).map(|state| *state)
    }

    /// Resolves once no mount is loading
    pub async fn settled(&self) {
        let mut loading = self.inner.loading.subscribe();
        let _ = loading.wait_for(|count| *count == 0).await;
    }

    fn on_visible(&self, container: NodeId, identity: String) {
        self.inner.mounts.insert(container, MountState::Loading);
        self.inner.loading.send_modify(|count| *count += 1);
        tracing::debug!(%container, %identity, "mounting component");

        let Some(runtime) = self.inner.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            tracing::warn!(%container, %identity, "no async runtime, component not mounted");
            self.finish(container, &identity, Err(anyhow::anyhow!("no async runtime")));
            return;
        };
        let this = self.clone();
        runtime.spawn(async move {
            let timer = this.inner.telemetry.timer(COMPONENT_LOAD_OPERATION);
            let outcome = match this.load(&identity).await {
                Ok(component) => component.render(&this.inner.document, container),
                Err(err) => Err(err.into()),
            };
            drop(timer);
            this.finish(container, &identity, outcome);
        });
    }

    fn finish(&self, container: NodeId, identity: &str, outcome: anyhow::Result<()>) {
        let state = match outcome {
            Ok(()) => match self.show_mounted(container) {
                Ok(()) => MountState::Mounted,
                Err(err) => {
                    tracing::warn!(%container, %identity, error = %err, "component container unavailable");
                    MountState::Failed
                }
            },
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(%container, %identity, error = %message, "component failed to mount");
                if let Err(dom) = self.show_failure(container, identity, &message) {
                    tracing::warn!(%container, error = %dom, "failure placeholder not rendered");
                }
                MountState::Failed
            }
        };
        self.inner.mounts.insert(container, state);
        self.inner.loading.send_modify(|count| *count = count.saturating_sub(1));
    }

    fn show_mounted(&self, container: NodeId) -> Result<(), DomError> {
        let document = &self.inner.document;
        document.remove_class(container, "loading")?;
        document.add_class(container, "loaded")
    }

    fn show_failure(&self, container: NodeId, identity: &str, message: &str) -> Result<(), DomError> {
        let document = &self.inner.document;
        document.remove_class(container, "loading")?;
        document.add_class(container, "error")?;
        document.append_new(
            container,
            Tag::Div,
            &[
                ("class", ERROR_PLACEHOLDER_CLASS),
                ("role", "alert"),
                ("data-component-error", identity),
                ("title", message),
            ],
        )?;
        Ok(())
    }
}

impl fmt::Debug for LazyComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyComponents")
            .field("registry", &self.inner.registry)
            .field("mounts", &self.inner.mounts.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_scheduler::SignalMode;
    use assetflow_test_utils::PageBuilder;
    use pretty_assertions::assert_eq;
    use crate::registry::Component;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Gallery;

    impl Component for Gallery {
        fn render(&self, document: &Document, container: NodeId) -> anyhow::Result<()> {
            document.append_new(container, Tag::Div, &[("class", "gallery-grid")])?;
            Ok(())
        }
    }

    struct Broken;

    impl Component for Broken {
        fn render(&self, _: &Document, _: NodeId) -> anyhow::Result<()> {
            anyhow::bail!("template missing")
        }
    }

    /// Registry whose "gallery" factory fails the first `failures` calls
    fn registry(failures: usize) -> (Arc<ComponentRegistry>, Arc<AtomicUsize>) {
        let registry = Arc::new(ComponentRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register("gallery", move || {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::task::yield_now().await;
                if call < failures {
                    anyhow::bail!("chunk failed to load");
                }
                Ok(Arc::new(Gallery) as SharedComponent)
            }
        });
        registry.register("broken", || async { Ok(Arc::new(Broken) as SharedComponent) });
        (registry, calls)
    }

    fn components(
        document: &Document,
        registry: Arc<ComponentRegistry>,
        mode: SignalMode,
    ) -> (LazyComponents, VisibilityScheduler, Telemetry) {
        let scheduler = VisibilityScheduler::new(mode);
        let telemetry = Telemetry::default();
        let lazy = LazyComponents::new(
            document.clone(),
            scheduler.clone(),
            registry,
            telemetry.clone(),
            ObserveOptions::default(),
        );
        (lazy, scheduler, telemetry)
    }

    fn children_with_class(document: &Document, node: NodeId, class: &str) -> usize {
        document
            .element(node)
            .unwrap()
            .children()
            .iter()
            .filter(|child| document.has_class(**child, class))
            .count()
    }

    #[tokio::test]
    async fn mounts_once_visible() {
        let page = PageBuilder::new().spacer(4000.0).component("gallery").build();
        let container = page.components[0];
        let (registry, calls) = registry(0);
        let (lazy, scheduler, telemetry) = components(&page.document, registry, SignalMode::Native);

        assert_eq!(lazy.mount(container).unwrap(), MountState::Pending);
        assert!(page.document.has_class(container, "loading"));
        scheduler.check(&page.document);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        page.reveal_all();
        scheduler.check(&page.document);
        assert_eq!(lazy.state(container), Some(MountState::Loading));
        lazy.settled().await;

        assert_eq!(lazy.state(container), Some(MountState::Mounted));
        assert!(page.document.has_class(container, "loaded"));
        assert_eq!(children_with_class(&page.document, container, "gallery-grid"), 1);
        assert_eq!(telemetry.samples(COMPONENT_LOAD_OPERATION).len(), 1);
    }

    #[tokio::test]
    async fn one_load_per_identity() {
        let page = PageBuilder::new().component("gallery").component("gallery").build();
        let (registry, calls) = registry(0);
        let (lazy, _, _) = components(&page.document, registry, SignalMode::Unavailable);

        for container in &page.components {
            lazy.mount(*container).unwrap();
        }
        lazy.settled().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for container in &page.components {
            assert_eq!(lazy.state(*container), Some(MountState::Mounted));
        }
    }

    #[tokio::test]
    async fn concurrent_loads_share_the_implementation() {
        let (registry, calls) = registry(0);
        let (lazy, _, _) = components(&Document::new(), registry, SignalMode::Native);

        let (a, b) = tokio::join!(lazy.load("gallery"), lazy.load("gallery"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(lazy.status("gallery"), LoadStatus::Ready);
    }

    #[tokio::test]
    async fn failed_load_shows_placeholder_and_remount_retries() {
        let page = PageBuilder::new().component("gallery").build();
        let container = page.components[0];
        let (registry, calls) = registry(1);
        let (lazy, _, _) = components(&page.document, registry, SignalMode::Unavailable);

        lazy.mount(container).unwrap();
        lazy.settled().await;
        assert_eq!(lazy.state(container), Some(MountState::Failed));
        assert!(page.document.has_class(container, "error"));
        assert_eq!(children_with_class(&page.document, container, ERROR_PLACEHOLDER_CLASS), 1);
        assert_eq!(lazy.status("gallery"), LoadStatus::Failed);

        lazy.mount(container).unwrap();
        lazy.settled().await;
        assert_eq!(lazy.state(container), Some(MountState::Mounted));
        assert!(!page.document.has_class(container, "error"));
        assert_eq!(children_with_class(&page.document, container, ERROR_PLACEHOLDER_CLASS), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn render_errors_fail_the_mount() {
        let page = PageBuilder::new().component("broken").build();
        let container = page.components[0];
        let (registry, _) = registry(0);
        let (lazy, _, _) = components(&page.document, registry, SignalMode::Unavailable);

        lazy.mount(container).unwrap();
        lazy.settled().await;
        assert_eq!(lazy.state(container), Some(MountState::Failed));
        assert_eq!(children_with_class(&page.document, container, ERROR_PLACEHOLDER_CLASS), 1);
    }

    #[tokio::test]
    async fn mounted_containers_are_left_alone() {
        let page = PageBuilder::new().component("gallery").build();
        let container = page.components[0];
        let (registry, calls) = registry(0);
        let (lazy, _, _) = components(&page.document, registry, SignalMode::Unavailable);

        lazy.mount(container).unwrap();
        lazy.settled().await;
        assert_eq!(lazy.mount(container).unwrap(), MountState::Mounted);
        lazy.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(children_with_class(&page.document, container, "gallery-grid"), 1);
    }

    #[tokio::test]
    async fn mount_rejects_unusable_containers() {
        let page = PageBuilder::new().component("carousel").image("/a.jpg").build();
        let (registry, _) = registry(0);
        let (lazy, _, _) = components(&page.document, registry, SignalMode::Native);

        assert_eq!(
            lazy.mount(page.components[0]),
            Err(ComponentError::Unregistered("carousel".into()))
        );
        assert_eq!(
            lazy.mount(page.images[0]),
            Err(ComponentError::MissingIdentity(page.images[0]))
        );
    }

    #[tokio::test]
    async fn preload_warms_the_loader() {
        let (registry, calls) = registry(0);
        let (lazy, _, _) = components(&Document::new(), registry, SignalMode::Native);

        assert_eq!(lazy.preload("gallery").unwrap(), LoadStatus::Loading);
        lazy.load("gallery").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(lazy.invalidate("gallery"));
        assert_eq!(lazy.status("gallery"), LoadStatus::Idle);
    }
}
