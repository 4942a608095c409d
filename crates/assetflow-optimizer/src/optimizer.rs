//! Continuous asset optimizer
//!
//! Startup scan plus the document change feed, both funnelled into
//! [`AssetOptimizer::optimize_asset`]. The per-URL table makes repeated
//! discovery harmless.

use crate::classify::{Classifier, DEFAULT_CRITICAL_PATTERNS};
use crate::error::OptimizeError;
use crate::hints::{HintSet, ResourceHint};
use crate::record::{AssetKind, AssetRecord, AssetStats, AssetStatus, AssetTable, Classification};
use assetflow_dom::{Document, DomEvent, Element, FeedItem, NodeId, Tag};
use assetflow_image::{parse_srcset, ImagePipeline};
use assetflow_telemetry::Telemetry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Optimizer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Literal, case-insensitive URL fragments marking critical assets
    pub critical_patterns: Vec<String>,
    /// Media query that keeps a stylesheet from blocking render
    pub inert_media: String,
}

impl OptimizerConfig {
    /// With critical patterns
    #[must_use]
    pub fn with_critical_patterns<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.critical_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            critical_patterns: DEFAULT_CRITICAL_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
            inert_media: "print".to_string(),
        }
    }
}

struct Inner {
    document: Document,
    images: ImagePipeline,
    telemetry: Telemetry,
    config: OptimizerConfig,
    classifier: Classifier,
    table: AssetTable,
    hints: HintSet,
    /// Inert stylesheets and the media to restore once they load
    deferred_media: DashMap<NodeId, Option<String>>,
    feed: Mutex<Option<JoinHandle<()>>>,
    processed: watch::Sender<u64>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.feed.get_mut().take() {
            handle.abort();
        }
    }
}

/// Classifies and rewrites every stylesheet, script and image in a document
///
/// Cheap to clone; clones share the asset table.
#[derive(Clone)]
pub struct AssetOptimizer {
    inner: Arc<Inner>,
}

impl AssetOptimizer {
    /// Create optimizer; nothing happens until [`AssetOptimizer::start`]
    ///
    /// # Errors
    /// [`OptimizeError::Pattern`] if the critical patterns do not compile
    pub fn new(
        document: Document,
        images: ImagePipeline,
        telemetry: Telemetry,
        config: OptimizerConfig,
    ) -> Result<Self, OptimizeError> {
        let classifier = Classifier::new(&config.critical_patterns)?;
        let (processed, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Inner {
                document,
                images,
                telemetry,
                config,
                classifier,
                table: AssetTable::new(),
                hints: HintSet::new(),
                deferred_media: DashMap::new(),
                feed: Mutex::new(None),
                processed,
            }),
        })
    }

    /// Subscribe to the change feed, scan the document, then follow the feed
    ///
    /// Returns whether the feed is being followed: outside a tokio runtime
    /// only the scan happens. Calling it while running is a no-op.
    pub fn start(&self) -> bool {
        let mut feed_task = self.inner.feed.lock();
        if feed_task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return true;
        }

        let document = &self.inner.document;
        let caught_up = document.last_sequence();
        let mut feed = document.subscribe();
        self.inner.processed.send_replace(caught_up);

        self.inner.hints.scan_existing(document);
        let discovered = self.scan();

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(discovered, "no async runtime, document scanned once");
            return false;
        };
        tracing::info!(discovered, "asset optimizer started");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *feed_task = Some(runtime.spawn(async move {
            while let Some(item) = feed.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let optimizer = AssetOptimizer { inner };
                match item {
                    FeedItem::Change(change) => {
                        optimizer.handle(change.event);
                        optimizer.mark_processed(change.sequence);
                    }
                    FeedItem::Lagged { skipped } => {
                        tracing::warn!(skipped, "change feed lagged, rescanning document");
                        let sequence = optimizer.inner.document.last_sequence();
                        optimizer.scan();
                        optimizer.mark_processed(sequence);
                    }
                }
            }
        }));
        true
    }

    /// Stop following the change feed; records are kept
    pub fn stop(&self) {
        if let Some(handle) = self.inner.feed.lock().take() {
            handle.abort();
            tracing::info!(assets = self.inner.table.len(), "asset optimizer stopped");
        }
    }

    /// Whether the feed loop is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .feed
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn mark_processed(&self, sequence: u64) {
        self.inner.processed.send_modify(|processed| *processed = (*processed).max(sequence));
    }

    fn handle(&self, event: DomEvent) {
        match event {
            DomEvent::Inserted { node, .. } => {
                self.optimize_subtree(node);
            }
            DomEvent::Loaded { node } | DomEvent::LoadFailed { node } => self.restore_media(node),
            DomEvent::Removed { .. } => {}
        }
    }

    /// Optimize every asset in the document; returns newly claimed assets
    pub fn scan(&self) -> usize {
        let root = self.inner.document.root();
        let claimed = self.optimize_subtree(root);
        tracing::debug!(claimed, "document scanned");
        claimed
    }

    /// Optimize `root` and its descendants; returns newly claimed assets
    pub fn optimize_subtree(&self, root: NodeId) -> usize {
        self.inner
            .document
            .descendants(root)
            .into_iter()
            .filter(|node| self.claim_and_optimize(*node).is_some())
            .count()
    }

    /// Optimize the asset behind one element
    ///
    /// Returns the URL's status afterwards, or `None` if the element is not
    /// a stylesheet, script or image. A URL that already has a record is not
    /// rewritten again, but a further image element using it still gets its
    /// own load cycle. Failures are recorded on the asset and logged, never
    /// returned.
    pub fn optimize_asset(&self, node: NodeId) -> Option<AssetStatus> {
        let url = self.claim_and_optimize(node).or_else(|| self.identify(node).map(|(url, _)| url))?;
        self.inner.table.get(&url).map(|record| record.status)
    }

    /// Runs the optimization if this call claimed the URL; returns the URL
    fn claim_and_optimize(&self, node: NodeId) -> Option<String> {
        let (url, kind) = self.identify(node)?;
        let Some(classification) = self
            .inner
            .table
            .claim(&url, kind, node, || self.inner.classifier.classify(&url))
        else {
            if kind == AssetKind::Image {
                self.observe_shared_image(node, &url);
            }
            return None;
        };
        tracing::debug!(%url, %kind, ?classification, "asset discovered");

        let timer = self.inner.telemetry.timer(format!("optimizer.{kind}"));
        let outcome = self.rewrite(node, &url, kind, classification);
        drop(timer);

        let settled = match outcome {
            Ok(()) => self.inner.table.advance(&url, AssetStatus::Optimized),
            Err(err) => {
                tracing::warn!(%url, %kind, error = %err, "asset optimization failed");
                self.inner.table.fail(&url, err.to_string())
            }
        };
        if let Err(err) = settled {
            tracing::warn!(%url, error = %err, "asset status not updated");
        }
        Some(url)
    }

    /// Another element already owns the record for `url`; this one still
    /// needs its own load cycle, started once
    fn observe_shared_image(&self, node: NodeId, url: &str) {
        let images = &self.inner.images;
        if images.state(node).is_some() {
            return;
        }
        match images.observe(node) {
            Ok(state) => tracing::debug!(%node, %url, %state, "image shares an existing record"),
            Err(err) => tracing::warn!(%node, %url, error = %err, "image not observed"),
        }
    }

    fn identify(&self, node: NodeId) -> Option<(String, AssetKind)> {
        let element = self.inner.document.element(node)?;
        let non_empty = |name: &str| element.attribute(name).filter(|value| !value.trim().is_empty());
        match element.tag() {
            Tag::Link if is_stylesheet(&element) => {
                non_empty("href").map(|href| (href.to_string(), AssetKind::Stylesheet))
            }
            Tag::Script => non_empty("src").map(|src| (src.to_string(), AssetKind::Script)),
            Tag::Img => non_empty("data-src")
                .or_else(|| non_empty("src"))
                .map(str::to_string)
                .or_else(|| {
                    let srcset = non_empty("data-srcset").or_else(|| non_empty("srcset"))?;
                    parse_srcset(srcset).into_iter().next().map(|candidate| candidate.url)
                })
                .map(|url| (url, AssetKind::Image)),
            _ => None,
        }
    }

    fn rewrite(
        &self,
        node: NodeId,
        url: &str,
        kind: AssetKind,
        classification: Classification,
    ) -> Result<(), OptimizeError> {
        match kind {
            AssetKind::Stylesheet => self.defer_stylesheet(node, classification)?,
            AssetKind::Script => self.schedule_script(node, classification)?,
            AssetKind::Image => {
                self.inner.images.observe(node)?;
            }
        }
        if classification.is_critical() {
            self.inner
                .hints
                .ensure(&self.inner.document, ResourceHint::preload(url, kind))?;
        }
        Ok(())
    }

    fn defer_stylesheet(&self, node: NodeId, classification: Classification) -> Result<(), OptimizeError> {
        if classification.is_critical() {
            return Ok(());
        }
        let document = &self.inner.document;
        if let Some(outcome) = document.load_outcome(node) {
            // the load notification is gone; an inert sheet would stay inert
            tracing::debug!(%node, ?outcome, "stylesheet already settled, not deferred");
            return Ok(());
        }
        let inert = self.inner.config.inert_media.as_str();
        let media = document.attribute(node, "media");
        if media.as_deref() == Some(inert) {
            return Ok(());
        }
        self.inner.deferred_media.insert(node, media);
        document.set_attribute(node, "media", inert)?;
        tracing::debug!(%node, "stylesheet deferred");
        Ok(())
    }

    fn restore_media(&self, node: NodeId) {
        let Some((_, media)) = self.inner.deferred_media.remove(&node) else {
            return;
        };
        let document = &self.inner.document;
        let restored = match media {
            Some(media) => document.set_attribute(node, "media", media),
            None => document.remove_attribute(node, "media").map(drop),
        };
        match restored {
            Ok(()) => tracing::debug!(%node, "stylesheet media restored"),
            Err(err) => tracing::warn!(%node, error = %err, "stylesheet media not restored"),
        }
    }

    fn schedule_script(&self, node: NodeId, classification: Classification) -> Result<(), OptimizeError> {
        let document = &self.inner.document;
        let explicit = ["async", "defer", "data-sync"]
            .iter()
            .any(|name| document.has_attribute(node, name))
            || document
                .attribute(node, "type")
                .is_some_and(|kind| kind.eq_ignore_ascii_case("module"));
        if explicit {
            return Ok(());
        }
        let directive = if classification.is_critical() { "defer" } else { "async" };
        document.set_attribute(node, directive, "")?;
        tracing::debug!(%node, directive, "script scheduled");
        Ok(())
    }

    /// Snapshot of all records in discovery order
    #[must_use]
    pub fn records(&self) -> Vec<AssetRecord> {
        self.inner.table.records()
    }

    /// Snapshot of the record for `url`
    #[must_use]
    pub fn record(&self, url: &str) -> Option<AssetRecord> {
        self.inner.table.get(url)
    }

    /// Counts per status
    #[must_use]
    pub fn stats(&self) -> AssetStats {
        self.inner.table.stats()
    }

    /// Hints this optimizer added
    #[must_use]
    pub fn hints(&self) -> Vec<ResourceHint> {
        self.inner.hints.added()
    }

    /// Stylesheets still waiting for their load notification
    #[must_use]
    pub fn deferred_stylesheets(&self) -> usize {
        self.inner.deferred_media.len()
    }

    /// Resolves once every change made so far has been handled
    ///
    /// Returns immediately when the optimizer is not running.
    pub async fn settled(&self) {
        if !self.is_running() {
            return;
        }
        let target = self.inner.document.last_sequence();
        let mut processed = self.inner.processed.subscribe();
        let _ = processed.wait_for(|sequence| *sequence >= target).await;
    }
}

fn is_stylesheet(element: &Element) -> bool {
    element
        .attribute("rel")
        .is_some_and(|rel| rel.split_ascii_whitespace().any(|token| token.eq_ignore_ascii_case("stylesheet")))
}

impl fmt::Debug for AssetOptimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetOptimizer")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_cache::{CapabilityCache, StaticProbe};
    use assetflow_dom::Viewport;
    use assetflow_image::{ImageState, ResolverConfig, ResponsiveResolver};
    use assetflow_scheduler::{ObserveOptions, SignalMode, VisibilityScheduler};
    use assetflow_test_utils::{PageBuilder, RecordingFetcher};
    use pretty_assertions::assert_eq;

    fn images(document: &Document, mode: SignalMode) -> ImagePipeline {
        let fetcher = RecordingFetcher::new().shared();
        let resolver = ResponsiveResolver::new(
            CapabilityCache::new(Arc::new(StaticProbe::new())),
            fetcher,
            ResolverConfig::default(),
        );
        ImagePipeline::new(
            document.clone(),
            VisibilityScheduler::new(mode),
            Arc::new(resolver),
            Telemetry::default(),
            ObserveOptions::default(),
        )
    }

    fn optimizer(document: &Document, mode: SignalMode) -> (AssetOptimizer, ImagePipeline, Telemetry) {
        let pipeline = images(document, mode);
        let telemetry = Telemetry::default();
        let optimizer = AssetOptimizer::new(
            document.clone(),
            pipeline.clone(),
            telemetry.clone(),
            OptimizerConfig::default(),
        )
        .unwrap();
        (optimizer, pipeline, telemetry)
    }

    #[tokio::test]
    async fn startup_scan_classifies_and_rewrites() {
        let page = PageBuilder::new()
            .stylesheet("/css/main.css")
            .stylesheet("/css/theme.css")
            .script("/js/runtime.js")
            .script("/js/analytics.js")
            .image("/img/hero.jpg")
            .build();
        let document = &page.document;
        let (optimizer, images, _) = optimizer(document, SignalMode::Native);

        assert!(optimizer.start());

        assert_eq!(optimizer.stats().optimized, 5);
        assert_eq!(optimizer.record("/css/main.css").unwrap().classification, Classification::Critical);
        assert_eq!(document.attribute(page.stylesheets[0], "media"), None);
        assert_eq!(document.attribute(page.stylesheets[1], "media").as_deref(), Some("print"));
        assert!(document.has_attribute(page.scripts[0], "defer"));
        assert!(document.has_attribute(page.scripts[1], "async"));
        assert_eq!(images.state(page.images[0]), Some(ImageState::Watching));

        let hinted: Vec<(String, String)> = optimizer
            .hints()
            .into_iter()
            .map(|hint| (hint.url, hint.destination))
            .collect();
        assert_eq!(
            hinted,
            vec![
                ("/css/main.css".to_string(), "style".to_string()),
                ("/js/runtime.js".to_string(), "script".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn inserted_subtrees_are_optimized() {
        let page = PageBuilder::new().build();
        let document = &page.document;
        let (optimizer, images, telemetry) = optimizer(document, SignalMode::Native);
        optimizer.start();

        let section = document.create_element(Tag::Div);
        let script = document
            .append_new(section, Tag::Script, &[("src", "/js/widget.js")])
            .unwrap();
        let img = document
            .append_new(section, Tag::Img, &[("data-src", "/img/late.png")])
            .unwrap();
        document.append_child(document.body(), section).unwrap();
        optimizer.settled().await;

        assert_eq!(optimizer.records().len(), 2);
        assert!(document.has_attribute(script, "async"));
        assert_eq!(images.state(img), Some(ImageState::Watching));
        assert_eq!(telemetry.samples("optimizer.script").len(), 1);
        assert_eq!(telemetry.samples("optimizer.image").len(), 1);
    }

    #[tokio::test]
    async fn repeated_discovery_is_idempotent() {
        let page = PageBuilder::new().script("/js/app.js").script("/js/app.js").build();
        let document = &page.document;
        let (optimizer, _, telemetry) = optimizer(document, SignalMode::Native);
        optimizer.start();

        // moving an element re-announces it
        document.append_child(document.body(), page.scripts[0]).unwrap();
        optimizer.settled().await;
        assert_eq!(optimizer.scan(), 0);
        assert_eq!(optimizer.optimize_asset(page.scripts[1]), Some(AssetStatus::Optimized));

        assert_eq!(optimizer.records().len(), 1);
        assert_eq!(telemetry.samples("optimizer.script").len(), 1);
        assert!(!document.has_attribute(page.scripts[1], "async"));
    }

    #[tokio::test]
    async fn explicit_directives_are_kept() {
        let document = Document::new();
        let body = document.body();
        let sync = document
            .append_new(body, Tag::Script, &[("src", "/a.js"), ("data-sync", "")])
            .unwrap();
        let module = document
            .append_new(body, Tag::Script, &[("src", "/b.js"), ("type", "module")])
            .unwrap();
        let deferred = document
            .append_new(body, Tag::Script, &[("src", "/c.js"), ("defer", "")])
            .unwrap();
        let (optimizer, _, _) = optimizer(&document, SignalMode::Native);
        optimizer.start();

        assert!(!document.has_attribute(sync, "async"));
        assert!(!document.has_attribute(module, "async"));
        assert!(!document.has_attribute(deferred, "async"));
        assert_eq!(optimizer.stats().optimized, 3);
    }

    #[tokio::test]
    async fn deferred_media_is_restored_after_load() {
        let document = Document::new();
        let head = document.head();
        let plain = document
            .append_new(head, Tag::Link, &[("rel", "stylesheet"), ("href", "/theme.css")])
            .unwrap();
        let screen = document
            .append_new(
                head,
                Tag::Link,
                &[("rel", "stylesheet"), ("href", "/fonts.css"), ("media", "screen")],
            )
            .unwrap();
        let (optimizer, _, _) = optimizer(&document, SignalMode::Native);
        optimizer.start();
        assert_eq!(optimizer.deferred_stylesheets(), 2);

        document.dispatch_load(plain).unwrap();
        document.dispatch_load_failed(screen).unwrap();
        optimizer.settled().await;

        assert_eq!(document.attribute(plain, "media"), None);
        assert_eq!(document.attribute(screen, "media").as_deref(), Some("screen"));
        assert_eq!(optimizer.deferred_stylesheets(), 0);
    }

    #[tokio::test]
    async fn stylesheets_loaded_before_start_stay_active() {
        let page = PageBuilder::new()
            .stylesheet("/css/theme.css")
            .stylesheet("/css/print.css")
            .build();
        let document = &page.document;
        let (loaded, pending) = (page.stylesheets[0], page.stylesheets[1]);
        document.dispatch_load(loaded).unwrap();
        let (optimizer, _, _) = optimizer(document, SignalMode::Native);

        optimizer.start();
        optimizer.settled().await;

        assert_eq!(document.attribute(loaded, "media"), None);
        assert_eq!(document.attribute(pending, "media").as_deref(), Some("print"));
        assert_eq!(optimizer.deferred_stylesheets(), 1);
        assert_eq!(optimizer.stats().optimized, 2);
    }

    #[tokio::test]
    async fn images_sharing_a_url_each_get_a_source() {
        let page = PageBuilder::new().image("/img/icon.png").image("/img/icon.png").build();
        let (optimizer, images, telemetry) = optimizer(&page.document, SignalMode::Unavailable);
        optimizer.start();
        images.settled().await;

        assert_eq!(optimizer.records().len(), 1);
        assert_eq!(telemetry.samples("optimizer.image").len(), 1);
        for img in &page.images {
            assert_eq!(images.state(*img), Some(ImageState::Loaded));
            assert_eq!(page.document.attribute(*img, "src").as_deref(), Some("/img/icon.png"));
        }

        // finished cycles are not restarted by rediscovery
        assert_eq!(optimizer.scan(), 0);
        images.settled().await;
        assert_eq!(images.stats().observed, 2);
    }

    #[tokio::test]
    async fn failed_rewrite_stays_with_its_asset() {
        let page = PageBuilder::new()
            .stylesheet("/css/theme.css")
            .image("/img/a.jpg")
            .script("/js/app.js")
            .build();
        let document = &page.document;
        let img = page.images[0];
        // an image pipeline bound to another document cannot reach this page
        let unrelated = images(&Document::new(), SignalMode::Unavailable);
        let optimizer = AssetOptimizer::new(
            document.clone(),
            unrelated,
            Telemetry::default(),
            OptimizerConfig::default(),
        )
        .unwrap();

        assert!(optimizer.start());
        optimizer.settled().await;

        let failed = optimizer.record("/img/a.jpg").unwrap();
        assert_eq!(failed.status, AssetStatus::Error);
        assert!(failed.error.is_some());
        assert_eq!(document.attribute(img, "data-src").as_deref(), Some("/img/a.jpg"));
        assert_eq!(document.attribute(img, "src"), None);
        assert_eq!(document.attribute(img, "loading"), None);
        assert!(!document.has_class(img, "loading"));

        let stats = optimizer.stats();
        assert_eq!((stats.optimized, stats.error), (2, 1));
        assert_eq!(document.attribute(page.stylesheets[0], "media").as_deref(), Some("print"));
        assert!(document.has_attribute(page.scripts[0], "async"));
    }

    #[tokio::test]
    async fn lagging_feed_falls_back_to_rescan() {
        let document = Document::with_feed_capacity(Viewport::default(), 1);
        let (optimizer, _, _) = optimizer(&document, SignalMode::Native);
        optimizer.start();

        for i in 0..5 {
            let src = format!("/js/chunk-{i}.js");
            document
                .append_new(document.body(), Tag::Script, &[("src", src.as_str())])
                .unwrap();
        }
        optimizer.settled().await;

        assert_eq!(optimizer.records().len(), 5);
        assert_eq!(optimizer.stats().optimized, 5);
    }

    #[tokio::test]
    async fn stop_ends_the_subscription() {
        let document = Document::new();
        let (optimizer, _, _) = optimizer(&document, SignalMode::Native);
        assert!(optimizer.start());
        assert!(optimizer.is_running());
        optimizer.stop();
        assert!(!optimizer.is_running());

        document
            .append_new(document.body(), Tag::Script, &[("src", "/late.js")])
            .unwrap();
        optimizer.settled().await;
        tokio::task::yield_now().await;
        assert!(optimizer.records().is_empty());
    }

    #[tokio::test]
    async fn routed_images_load_when_visible() {
        let page = PageBuilder::new().image("/img/a.jpg").image("/img/b.jpg").build();
        let (optimizer, images, _) = optimizer(&page.document, SignalMode::Unavailable);
        optimizer.start();
        images.settled().await;

        for img in &page.images {
            assert_eq!(images.state(*img), Some(ImageState::Loaded));
        }
        assert_eq!(optimizer.stats().optimized, 2);
    }

    #[test]
    fn scan_without_runtime_still_optimizes() {
        let page = PageBuilder::new().script("/js/vendor.js").build();
        let (optimizer, _, _) = optimizer(&page.document, SignalMode::Native);
        assert!(!optimizer.start());
        assert!(page.document.has_attribute(page.scripts[0], "defer"));
    }
}
