//! Lazy image pipeline
//!
//! `unobserved → watching → loading → loaded | failed`. The element's `src`
//! changes once per cycle, after the replacement has been preloaded.

use crate::descriptor::{parse_srcset, Candidate};
use crate::error::ImageError;
use crate::resolver::{select, ResponsiveResolver};
use crate::state::{validate_transition, ImageState};
use assetflow_dom::{Document, DomError, NodeId};
use assetflow_scheduler::{ObserveOptions, Registration, VisibilityScheduler};
use assetflow_telemetry::Telemetry;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Telemetry operation name for image loads
pub const IMAGE_LOAD_OPERATION: &str = "image.load";

const CLASS_LOADING: &str = "loading";
const CLASS_LOADED: &str = "loaded";
const CLASS_ERROR: &str = "error";

/// Outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStats {
    /// Images registered for visibility
    pub observed: usize,
    /// Chosen source swapped in
    pub loaded: usize,
    /// Fell back to the original source
    pub failed: usize,
    /// Element gone before any source could be set
    pub lost: usize,
    /// Loaded from an upgraded format
    pub upgraded: usize,
}

/// How a load cycle ended
#[derive(Debug, Clone, Copy)]
enum Outcome {
    Loaded { upgraded: bool },
    Fallback,
    Lost,
}

impl Outcome {
    fn state(self) -> ImageState {
        match self {
            Self::Loaded { .. } => ImageState::Loaded,
            Self::Fallback | Self::Lost => ImageState::Failed,
        }
    }
}

struct ImageTask {
    original: String,
    candidates: Vec<Candidate>,
    default_source: Option<String>,
    state: ImageState,
    registration: Option<Registration>,
}

impl ImageTask {
    fn advance(&mut self, node: NodeId, to: ImageState) -> Result<(), ImageError> {
        validate_transition(self.state, to)?;
        tracing::debug!(%node, from = %self.state, %to, "image state");
        self.state = to;
        Ok(())
    }
}

struct Inner {
    document: Document,
    scheduler: VisibilityScheduler,
    resolver: Arc<ResponsiveResolver>,
    telemetry: Telemetry,
    options: ObserveOptions,
    runtime: Option<Handle>,
    tasks: DashMap<NodeId, ImageTask>,
    outcomes: DashMap<NodeId, ImageState>,
    loading: watch::Sender<usize>,
    stats: Mutex<ImageStats>,
}

/// Defers image loading until visibility, then swaps in the best source
///
/// Cheap to clone; clones share the task table.
#[derive(Clone)]
pub struct ImagePipeline {
    inner: Arc<Inner>,
}

impl ImagePipeline {
    /// Create pipeline
    ///
    /// Loads run on the tokio runtime current at construction, or at
    /// visibility time if there was none.
    #[must_use]
    pub fn new(
        document: Document,
        scheduler: VisibilityScheduler,
        resolver: Arc<ResponsiveResolver>,
        telemetry: Telemetry,
        options: ObserveOptions,
    ) -> Self {
        let (loading, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                document,
                scheduler,
                resolver,
                telemetry,
                options,
                runtime: Handle::try_current().ok(),
                tasks: DashMap::new(),
                outcomes: DashMap::new(),
                loading,
                stats: Mutex::new(ImageStats::default()),
            }),
        }
    }

    /// Start a load cycle for an image element
    ///
    /// Marks the element (`loading="lazy"`, `decoding="async"`, class
    /// `loading`) and registers it for visibility. Observing an element that
    /// already has a live task returns its state unchanged; observing one
    /// whose previous cycle finished starts a new cycle.
    ///
    /// # Errors
    /// - [`ImageError::Dom`] if the element is unknown
    /// - [`ImageError::NoSource`] if it has no source and no usable descriptors
    pub fn observe(&self, node: NodeId) -> Result<ImageState, ImageError> {
        let document = &self.inner.document;
        let element = document.element(node).ok_or(DomError::UnknownNode(node))?;

        let srcset = element
            .attribute("data-srcset")
            .or_else(|| element.attribute("srcset"))
            .unwrap_or_default();
        let candidates = parse_srcset(srcset);
        let viewport = document.viewport();
        let default_source =
            select(&candidates, viewport.width, viewport.device_pixel_ratio).map(|c| c.url.clone());
        let original = element
            .attribute("data-src")
            .or_else(|| element.attribute("src"))
            .filter(|src| !src.is_empty())
            .map(str::to_string)
            .or_else(|| default_source.clone())
            .ok_or(ImageError::NoSource(node))?;

        let mut task = ImageTask {
            original,
            candidates,
            default_source,
            state: ImageState::Unobserved,
            registration: None,
        };
        task.advance(node, ImageState::Watching)?;

        match self.inner.tasks.entry(node) {
            Entry::Occupied(live) => return Ok(live.get().state),
            Entry::Vacant(slot) => {
                slot.insert(task);
            }
        }

        if let Err(err) = Self::mark_watching(document, node) {
            self.inner.tasks.remove(&node);
            return Err(err.into());
        }
        self.inner.outcomes.remove(&node);
        self.inner.stats.lock().observed += 1;

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let registration = self.inner.scheduler.observe(node, self.inner.options, move |target| {
            if let Some(inner) = weak.upgrade() {
                ImagePipeline { inner }.on_visible(target);
            }
        });

        if let Some(mut task) = self.inner.tasks.get_mut(&node) {
            if task.state == ImageState::Watching {
                task.registration = Some(registration);
            }
        }
        Ok(self.state(node).unwrap_or(ImageState::Watching))
    }

    fn mark_watching(document: &Document, node: NodeId) -> Result<(), DomError> {
        document.set_attribute(node, "loading", "lazy")?;
        document.set_attribute(node, "decoding", "async")?;
        document.remove_class(node, CLASS_LOADED)?;
        document.remove_class(node, CLASS_ERROR)?;
        document.add_class(node, CLASS_LOADING)
    }

    /// Drop a task that has not started loading
    ///
    /// Returns `false` if there is no watching task for `node`.
    pub fn unobserve(&self, node: NodeId) -> bool {
        let Some((_, task)) = self
            .inner
            .tasks
            .remove_if(&node, |_, task| task.state == ImageState::Watching)
        else {
            return false;
        };
        if let Some(registration) = task.registration {
            self.inner.scheduler.unobserve(&registration);
        }
        true
    }

    fn on_visible(&self, node: NodeId) {
        let (chosen, original) = {
            let Some(mut task) = self.inner.tasks.get_mut(&node) else {
                return;
            };
            if let Err(err) = task.advance(node, ImageState::Loading) {
                tracing::warn!(%node, error = %err, "ignoring visibility signal");
                return;
            }
            task.registration = None;

            let viewport = self.inner.document.viewport();
            let chosen = select(&task.candidates, viewport.width, viewport.device_pixel_ratio)
                .map(|c| c.url.clone())
                .or_else(|| task.default_source.clone())
                .unwrap_or_else(|| task.original.clone());
            (chosen, task.original.clone())
        };

        self.inner.loading.send_modify(|count| *count += 1);

        match self.inner.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => {
                let pipeline = self.clone();
                runtime.spawn(async move { pipeline.load(node, chosen, original).await });
            }
            None => {
                tracing::warn!(%node, "no async runtime, showing original source");
                let outcome = match self.swap(node, &original, CLASS_ERROR) {
                    Ok(()) => Outcome::Fallback,
                    Err(err) => {
                        tracing::warn!(%node, error = %err, "image element gone before its source was set");
                        Outcome::Lost
                    }
                };
                self.finish(node, outcome);
            }
        }
    }

    async fn load(self, node: NodeId, chosen: String, original: String) {
        let timer = self.inner.telemetry.timer(IMAGE_LOAD_OPERATION);
        let source = self.inner.resolver.upgrade_format(&chosen).await;

        let swapped = match self.inner.resolver.fetcher().preload_image(&source).await {
            Ok(()) => self.swap(node, &source, CLASS_LOADED).map(|()| Outcome::Loaded {
                upgraded: source != chosen,
            }),
            Err(err) => {
                tracing::warn!(%node, url = %source, error = %err, "image preload failed, keeping original source");
                self.swap(node, &original, CLASS_ERROR).map(|()| Outcome::Fallback)
            }
        };
        let outcome = swapped.unwrap_or_else(|err| {
            tracing::warn!(%node, error = %err, "image element gone before its source was set");
            Outcome::Lost
        });
        drop(timer);

        self.finish(node, outcome);
    }

    fn swap(&self, node: NodeId, src: &str, class: &str) -> Result<(), DomError> {
        let document = &self.inner.document;
        document.set_attribute(node, "src", src)?;
        document.remove_class(node, CLASS_LOADING)?;
        document.add_class(node, class)
    }

    fn finish(&self, node: NodeId, outcome: Outcome) {
        let state = outcome.state();
        if let Some((_, mut task)) = self.inner.tasks.remove(&node) {
            if let Err(err) = task.advance(node, state) {
                tracing::warn!(%node, error = %err, "unexpected image state");
            }
        }
        self.inner.outcomes.insert(node, state);
        {
            let mut stats = self.inner.stats.lock();
            match outcome {
                Outcome::Loaded { upgraded } => {
                    stats.loaded += 1;
                    stats.upgraded += usize::from(upgraded);
                }
                Outcome::Fallback => stats.failed += 1,
                Outcome::Lost => stats.lost += 1,
            }
        }
        self.inner.loading.send_modify(|count| *count = count.saturating_sub(1));
    }

    /// State of the element's current or most recent cycle
    #[must_use]
    pub fn state(&self, node: NodeId) -> Option<ImageState> {
        self.inner
            .tasks
            .get(&node)
            .map(|task| task.state)
            .or_else(|| self.inner.outcomes.get(&node).map(|state| *state))
    }

    /// Images currently loading
    #[must_use]
    pub fn loading(&self) -> usize {
        *self.inner.loading.borrow()
    }

    /// Outcome counters
    #[must_use]
    pub fn stats(&self) -> ImageStats {
        *self.inner.stats.lock()
    }

    /// Resolves once no image is loading
    pub async fn settled(&self) {
        let mut loading = self.inner.loading.subscribe();
        // The sender lives as long as `self`.
        let _ = loading.wait_for(|count| *count == 0).await;
    }
}

impl fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("tasks", &self.inner.tasks.len())
            .field("loading", &self.loading())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverConfig;
    use assetflow_cache::{CapabilityCache, Feature, ImageFormat, StaticProbe};
    use assetflow_scheduler::SignalMode;
    use assetflow_test_utils::{PageBuilder, RecordingFetcher};
    use assetflow_dom::Viewport;
    use std::time::Duration;

    struct Harness {
        pipeline: ImagePipeline,
        scheduler: VisibilityScheduler,
        telemetry: Telemetry,
        fetcher: Arc<RecordingFetcher>,
    }

    fn harness(document: &Document, fetcher: RecordingFetcher, webp: bool, mode: SignalMode) -> Harness {
        let fetcher = fetcher.shared();
        let capabilities = CapabilityCache::new(Arc::new(
            StaticProbe::new().with(Feature::NextGenImage(ImageFormat::Webp), webp),
        ));
        let resolver = Arc::new(ResponsiveResolver::new(
            capabilities,
            fetcher.clone(),
            ResolverConfig::default(),
        ));
        let scheduler = VisibilityScheduler::new(mode);
        let telemetry = Telemetry::default();
        let pipeline = ImagePipeline::new(
            document.clone(),
            scheduler.clone(),
            resolver,
            telemetry.clone(),
            ObserveOptions::default(),
        );
        Harness {
            pipeline,
            scheduler,
            telemetry,
            fetcher,
        }
    }

    #[tokio::test]
    async fn watches_until_visible_then_loads() {
        let page = PageBuilder::new().spacer(3000.0).image("/hero.jpg").build();
        let document = &page.document;
        let img = page.images[0];
        let h = harness(document, RecordingFetcher::new(), false, SignalMode::Native);

        assert_eq!(h.pipeline.observe(img).unwrap(), ImageState::Watching);
        assert_eq!(document.attribute(img, "loading").as_deref(), Some("lazy"));
        assert_eq!(document.attribute(img, "decoding").as_deref(), Some("async"));
        assert!(document.has_class(img, "loading"));
        assert_eq!(document.attribute(img, "src"), None);

        assert_eq!(h.scheduler.check(document), 0);
        assert_eq!(h.pipeline.state(img), Some(ImageState::Watching));

        page.reveal_all();
        assert_eq!(h.scheduler.check(document), 1);
        assert_eq!(h.pipeline.state(img), Some(ImageState::Loading));
        h.pipeline.settled().await;

        assert_eq!(h.pipeline.state(img), Some(ImageState::Loaded));
        assert_eq!(document.attribute(img, "src").as_deref(), Some("/hero.jpg"));
        assert!(document.has_class(img, "loaded"));
        assert!(!document.has_class(img, "loading"));
        assert_eq!(h.fetcher.preloads(), vec!["/hero.jpg"]);
        assert_eq!(h.telemetry.samples(IMAGE_LOAD_OPERATION).len(), 1);
    }

    #[tokio::test]
    async fn resolves_then_upgrades() {
        let page = PageBuilder::with_viewport(Viewport::new(500.0, 800.0, 1.0))
            .image_with(&[("data-srcset", "/s.jpg 400w, /m.jpg 800w, /l.jpg 1200w")])
            .build();
        let img = page.images[0];
        let h = harness(&page.document, RecordingFetcher::new(), true, SignalMode::Unavailable);

        h.pipeline.observe(img).unwrap();
        h.pipeline.settled().await;

        assert_eq!(page.document.attribute(img, "src").as_deref(), Some("/m.webp"));
        assert_eq!(h.pipeline.stats().upgraded, 1);
    }

    #[tokio::test]
    async fn failed_preload_falls_back_to_original() {
        let page = PageBuilder::new().image("/broken.jpg").build();
        let img = page.images[0];
        let fetcher = RecordingFetcher::new().with_broken("/broken.jpg");
        let h = harness(&page.document, fetcher, false, SignalMode::Unavailable);

        h.pipeline.observe(img).unwrap();
        h.pipeline.settled().await;

        assert_eq!(h.pipeline.state(img), Some(ImageState::Failed));
        assert_eq!(page.document.attribute(img, "src").as_deref(), Some("/broken.jpg"));
        assert!(page.document.has_class(img, "error"));
        assert!(!page.document.has_class(img, "loaded"));
        assert_eq!(h.pipeline.stats().failed, 1);
    }

    #[tokio::test]
    async fn removed_elements_are_not_counted_as_fallbacks() {
        let page = PageBuilder::new().image("/a.jpg").build();
        let document = &page.document;
        let img = page.images[0];
        let h = harness(document, RecordingFetcher::new(), false, SignalMode::Native);

        h.pipeline.observe(img).unwrap();
        assert_eq!(h.scheduler.check(document), 1);
        // the spawned load has not run yet on this runtime
        document.remove(img).unwrap();
        h.pipeline.settled().await;

        assert_eq!(h.pipeline.state(img), Some(ImageState::Failed));
        let stats = h.pipeline.stats();
        assert_eq!((stats.loaded, stats.failed, stats.lost), (0, 0, 1));
        assert_eq!(h.pipeline.loading(), 0);
    }

    #[tokio::test]
    async fn broken_upgrade_shows_the_unmodified_original() {
        let page = PageBuilder::new().image("/a.jpg?v=1").build();
        let img = page.images[0];
        let fetcher = RecordingFetcher::new().with_broken("/a.webp?v=1");
        let h = harness(&page.document, fetcher, true, SignalMode::Unavailable);

        h.pipeline.observe(img).unwrap();
        h.pipeline.settled().await;

        assert_eq!(page.document.attribute(img, "src").as_deref(), Some("/a.jpg?v=1"));
        assert_eq!(h.pipeline.state(img), Some(ImageState::Failed));
    }

    #[tokio::test]
    async fn repeated_observe_keeps_one_task() {
        let page = PageBuilder::new().spacer(5000.0).image("/a.jpg").build();
        let img = page.images[0];
        let h = harness(&page.document, RecordingFetcher::new(), false, SignalMode::Native);

        h.pipeline.observe(img).unwrap();
        h.pipeline.observe(img).unwrap();
        assert_eq!(h.scheduler.pending(), 1);
        assert_eq!(h.pipeline.stats().observed, 1);
    }

    #[tokio::test]
    async fn new_cycle_after_terminal_state() {
        let page = PageBuilder::new().image("/a.jpg").build();
        let img = page.images[0];
        let h = harness(&page.document, RecordingFetcher::new(), false, SignalMode::Unavailable);

        h.pipeline.observe(img).unwrap();
        h.pipeline.settled().await;
        h.pipeline.observe(img).unwrap();
        h.pipeline.settled().await;

        assert_eq!(h.fetcher.preloads().len(), 2);
        assert_eq!(h.pipeline.stats().loaded, 2);
    }

    #[tokio::test]
    async fn unobserve_cancels_a_watching_task() {
        let page = PageBuilder::new().spacer(5000.0).image("/a.jpg").build();
        let img = page.images[0];
        let h = harness(&page.document, RecordingFetcher::new(), false, SignalMode::Native);

        h.pipeline.observe(img).unwrap();
        assert!(h.pipeline.unobserve(img));
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(h.pipeline.state(img), None);
        assert!(!h.pipeline.unobserve(img));
    }

    #[tokio::test]
    async fn elements_without_source_are_rejected() {
        let page = PageBuilder::new().image_with(&[("alt", "nothing")]).build();
        let h = harness(&page.document, RecordingFetcher::new(), false, SignalMode::Native);
        assert_eq!(
            h.pipeline.observe(page.images[0]),
            Err(ImageError::NoSource(page.images[0]))
        );
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_waits_for_slow_preloads() {
        let page = PageBuilder::new().image("/a.jpg").image("/b.jpg").build();
        let fetcher = RecordingFetcher::new().with_latency(Duration::from_millis(300));
        let h = harness(&page.document, fetcher, false, SignalMode::Unavailable);

        for img in &page.images {
            h.pipeline.observe(*img).unwrap();
        }
        assert_eq!(h.pipeline.loading(), 2);
        h.pipeline.settled().await;
        assert_eq!(h.pipeline.loading(), 0);
        assert_eq!(h.pipeline.stats().loaded, 2);
    }
}
