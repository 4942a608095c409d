//! The assembled pipeline
//!
//! [`PipelineBuilder`] wires one document to the capability cache, the
//! visibility scheduler, both lazy pipelines, the optimizer and telemetry.
//! [`Pipeline`] exposes the programmatic surface over all of them.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use assetflow_cache::{CapabilityCache, CapabilityProbe, DecodeProbe, Feature, StaticProbe};
use assetflow_component::{ComponentRegistry, LazyComponents, MountState, SharedComponent, COMPONENT_ATTRIBUTE};
use assetflow_dom::{Document, Fetcher, LayoutSource, NodeId};
use assetflow_image::{resolve, ImagePipeline, ImageState, ResponsiveResolver};
use assetflow_optimizer::{AssetOptimizer, AssetRecord, AssetStats, AssetStatus};
use assetflow_scheduler::{SignalMode, VisibilityScheduler};
use assetflow_telemetry::{MemorySource, SystemMemory, Telemetry, TelemetryReport};
use std::fmt;
use std::sync::Arc;

/// Builds a [`Pipeline`] for one document
pub struct PipelineBuilder {
    document: Document,
    fetcher: Arc<dyn Fetcher>,
    config: PipelineConfig,
    probe: Option<Arc<dyn CapabilityProbe>>,
    layout: Option<Arc<dyn LayoutSource>>,
    memory: Option<Option<Arc<dyn MemorySource>>>,
    registry: Arc<ComponentRegistry>,
}

impl PipelineBuilder {
    /// Start from defaults
    ///
    /// Without further settings capabilities are probed by decoding through
    /// `fetcher`, layout comes from the document itself and memory from the
    /// current process.
    #[must_use]
    pub fn new(document: Document, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            document,
            fetcher,
            config: PipelineConfig::default(),
            probe: None,
            layout: None,
            memory: None,
            registry: Arc::new(ComponentRegistry::new()),
        }
    }

    /// With configuration
    #[inline]
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// With capability probe
    #[inline]
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// With layout source for polling visibility
    #[inline]
    #[must_use]
    pub fn layout(mut self, layout: Arc<dyn LayoutSource>) -> Self {
        self.layout = Some(layout);
        self
    }

    /// With memory source; `None` disables sampling
    #[inline]
    #[must_use]
    pub fn memory(mut self, source: Option<Arc<dyn MemorySource>>) -> Self {
        self.memory = Some(source);
        self
    }

    /// With component registry
    #[inline]
    #[must_use]
    pub fn registry(mut self, registry: Arc<ComponentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Validate the configuration, settle the signal mode and wire everything
    ///
    /// A configured native visibility signal the runtime does not support
    /// degrades to eager visibility.
    ///
    /// # Errors
    /// - [`PipelineError::Config`] for out-of-range configuration
    /// - [`PipelineError::Optimize`] if the critical patterns do not compile
    pub async fn build(self) -> Result<Pipeline, PipelineError> {
        let Self {
            document,
            fetcher,
            config,
            probe,
            layout,
            memory,
            registry,
        } = self;
        config.validate()?;

        let probe = probe.unwrap_or_else(|| {
            let host = StaticProbe::new().with(Feature::VisibilitySignal, true);
            Arc::new(DecodeProbe::new(fetcher.clone(), Arc::new(host)))
        });
        let capabilities = CapabilityCache::new(probe);

        let mode = match config.visibility.signal_mode() {
            SignalMode::Native if !capabilities.probe(&Feature::VisibilitySignal).await => {
                tracing::warn!("native visibility signal unsupported, loading eagerly");
                SignalMode::Unavailable
            }
            mode => mode,
        };
        let scheduler = VisibilityScheduler::new(mode);
        let options = config.visibility.observe_options();
        let telemetry = Telemetry::new(config.telemetry.clone());

        let resolver = Arc::new(ResponsiveResolver::new(
            capabilities.clone(),
            fetcher,
            config.images.clone(),
        ));
        let images = ImagePipeline::new(
            document.clone(),
            scheduler.clone(),
            resolver.clone(),
            telemetry.clone(),
            options,
        );
        let components = LazyComponents::new(
            document.clone(),
            scheduler.clone(),
            registry,
            telemetry.clone(),
            options,
        );
        let optimizer = AssetOptimizer::new(
            document.clone(),
            images.clone(),
            telemetry.clone(),
            config.optimizer.clone(),
        )?;

        let layout = layout.unwrap_or_else(|| Arc::new(document.clone()));
        let memory = memory.unwrap_or_else(|| {
            SystemMemory::detect().map(|source| Arc::new(source) as Arc<dyn MemorySource>)
        });

        tracing::debug!(?mode, "pipeline assembled");
        Ok(Pipeline {
            document,
            config: Arc::new(config),
            capabilities,
            scheduler,
            resolver,
            images,
            components,
            optimizer,
            telemetry,
            layout,
            memory,
        })
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("components", &self.registry.identities())
            .finish_non_exhaustive()
    }
}

/// Resource-optimization pipeline for one document
///
/// Cheap to clone; clones drive the same components.
#[derive(Clone)]
pub struct Pipeline {
    document: Document,
    config: Arc<PipelineConfig>,
    capabilities: CapabilityCache,
    scheduler: VisibilityScheduler,
    resolver: Arc<ResponsiveResolver>,
    images: ImagePipeline,
    components: LazyComponents,
    optimizer: AssetOptimizer,
    telemetry: Telemetry,
    layout: Arc<dyn LayoutSource>,
    memory: Option<Arc<dyn MemorySource>>,
}

impl Pipeline {
    /// Start building a pipeline for `document`
    #[inline]
    #[must_use]
    pub fn builder(document: Document, fetcher: Arc<dyn Fetcher>) -> PipelineBuilder {
        PipelineBuilder::new(document, fetcher)
    }

    /// Start the optimizer, visibility polling, memory sampling, and mount
    /// every component placeholder already in the document
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let following = self.optimizer.start();
        let polling = self.scheduler.start_polling(self.layout.clone());
        let sampling = self
            .memory
            .as_ref()
            .is_some_and(|source| self.telemetry.start_memory_sampling(source.clone()));
        let mounted = self.mount_components();
        tracing::info!(
            assets = self.optimizer.stats().total(),
            mounted,
            following,
            polling,
            sampling,
            "pipeline started"
        );
    }

    /// Stop background work; state and records are kept
    pub fn stop(&self) {
        self.optimizer.stop();
        self.scheduler.stop_polling();
        self.telemetry.stop_memory_sampling();
        tracing::info!(assets = self.optimizer.stats().total(), "pipeline stopped");
    }

    /// Mount every `data-component` placeholder in the document
    ///
    /// Placeholders that cannot be mounted are logged and skipped. Returns the
    /// number of placeholders now pending, loading or mounted.
    pub fn mount_components(&self) -> usize {
        let placeholders = self
            .document
            .descendants(self.document.root())
            .into_iter()
            .filter(|node| self.document.has_attribute(*node, COMPONENT_ATTRIBUTE));
        let mut mounted = 0;
        for node in placeholders {
            match self.components.mount(node) {
                Ok(MountState::Failed) => {}
                Ok(_) => mounted += 1,
                Err(err) => tracing::warn!(%node, error = %err, "component placeholder skipped"),
            }
        }
        mounted
    }

    /// Whether the runtime supports `feature`; memoized
    pub async fn probe(&self, feature: &Feature) -> bool {
        self.capabilities.probe(feature).await
    }

    /// Lazily load the image element `node`
    ///
    /// # Errors
    /// [`PipelineError::Image`] if the element has no usable source
    pub fn observe(&self, node: NodeId) -> Result<ImageState, PipelineError> {
        Ok(self.images.observe(node)?)
    }

    /// Lazily mount the component placeholder `node`
    ///
    /// # Errors
    /// [`PipelineError::Component`] for a missing or unregistered identity
    pub fn mount(&self, node: NodeId) -> Result<MountState, PipelineError> {
        Ok(self.components.mount(node)?)
    }

    /// Shared implementation of component `identity`
    ///
    /// # Errors
    /// [`PipelineError::Component`] if the identity is unknown or its load failed
    pub async fn load(&self, identity: &str) -> Result<SharedComponent, PipelineError> {
        Ok(self.components.load(identity).await?)
    }

    /// Best candidate of `srcset` for the document's current viewport
    ///
    /// # Errors
    /// [`PipelineError::Resolve`] if the list has no usable candidate
    pub fn resolve(&self, srcset: &str) -> Result<String, PipelineError> {
        let viewport = self.document.viewport();
        Ok(resolve(srcset, viewport.width, viewport.device_pixel_ratio)?)
    }

    /// Next-gen sibling of `url` when supported and present, else `url`
    pub async fn upgrade_format(&self, url: &str) -> String {
        self.resolver.upgrade_format(url).await
    }

    /// Append a duration sample
    #[inline]
    pub fn record_duration(&self, name: &str, ms: f64) {
        self.telemetry.record_duration(name, ms);
    }

    /// Aggregated telemetry
    #[must_use]
    pub fn report(&self) -> TelemetryReport {
        self.telemetry.report()
    }

    /// Optimize the asset behind `node` now
    pub fn optimize_asset(&self, node: NodeId) -> Option<AssetStatus> {
        self.optimizer.optimize_asset(node)
    }

    /// Sample the layout source once; returns the number of targets fired
    pub fn check_visibility(&self) -> usize {
        self.scheduler.check(self.layout.as_ref())
    }

    /// Resolves once document changes, image loads and component mounts have
    /// all been processed
    pub async fn settled(&self) {
        loop {
            let sequence = self.document.last_sequence();
            self.optimizer.settled().await;
            self.images.settled().await;
            self.components.settled().await;
            if self.document.last_sequence() == sequence {
                break;
            }
        }
    }

    /// Asset records in discovery order
    #[must_use]
    pub fn records(&self) -> Vec<AssetRecord> {
        self.optimizer.records()
    }

    /// Asset counts per status
    #[must_use]
    pub fn stats(&self) -> AssetStats {
        self.optimizer.stats()
    }

    /// The document being optimized
    #[inline]
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Visibility signal mode after capability checks
    #[inline]
    #[must_use]
    pub fn signal_mode(&self) -> SignalMode {
        self.scheduler.mode()
    }

    /// Capability cache
    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> &CapabilityCache {
        &self.capabilities
    }

    /// Visibility scheduler
    #[inline]
    #[must_use]
    pub fn scheduler(&self) -> &VisibilityScheduler {
        &self.scheduler
    }

    /// Lazy image pipeline
    #[inline]
    #[must_use]
    pub fn images(&self) -> &ImagePipeline {
        &self.images
    }

    /// Lazy component pipeline
    #[inline]
    #[must_use]
    pub fn components(&self) -> &LazyComponents {
        &self.components
    }

    /// Asset optimizer
    #[inline]
    #[must_use]
    pub fn optimizer(&self) -> &AssetOptimizer {
        &self.optimizer
    }

    /// Telemetry aggregator
    #[inline]
    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("mode", &self.scheduler.mode())
            .field("optimizer", &self.optimizer)
            .field("images", &self.images.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VisibilityMode;
    use assetflow_test_utils::{PageBuilder, RecordingFetcher};
    use pretty_assertions::assert_eq;

    fn quiet(builder: PipelineBuilder) -> PipelineBuilder {
        builder.memory(None)
    }

    #[tokio::test]
    async fn unsupported_native_signal_degrades_to_eager() {
        let page = PageBuilder::new().image("/img/far.jpg").spacer(5000.0).build();
        let pipeline = quiet(Pipeline::builder(page.document.clone(), RecordingFetcher::new().shared()))
            .probe(Arc::new(StaticProbe::new().with(Feature::VisibilitySignal, false)))
            .build()
            .await
            .unwrap();
        assert_eq!(pipeline.signal_mode(), SignalMode::Unavailable);

        pipeline.start();
        pipeline.settled().await;
        assert_eq!(pipeline.images().state(page.images[0]), Some(ImageState::Loaded));
    }

    #[tokio::test]
    async fn configured_mode_is_kept_when_supported() {
        let page = PageBuilder::new().build();
        let config = PipelineConfig::new().with_visibility_mode(VisibilityMode::Polling);
        let pipeline = quiet(Pipeline::builder(page.document.clone(), RecordingFetcher::new().shared()))
            .config(config)
            .build()
            .await
            .unwrap();
        assert!(matches!(pipeline.signal_mode(), SignalMode::Polling { .. }));

        pipeline.start();
        assert!(pipeline.scheduler().is_polling());
        pipeline.stop();
        assert!(!pipeline.scheduler().is_polling());
        assert!(!pipeline.optimizer().is_running());
    }

    #[tokio::test]
    async fn invalid_configuration_fails_the_build() {
        let err = Pipeline::builder(Document::new(), RecordingFetcher::new().shared())
            .config(PipelineConfig::new().with_threshold(-0.5))
            .build()
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn resolve_uses_the_document_viewport() {
        let document = Document::with_viewport(assetflow_dom::Viewport::new(400.0, 800.0, 2.0));
        let pipeline = quiet(Pipeline::builder(document, RecordingFetcher::new().shared()))
            .build()
            .await
            .unwrap();
        assert_eq!(pipeline.resolve("a.jpg 400w, b.jpg 800w, c.jpg 1200w").unwrap(), "b.jpg");
        assert!(matches!(pipeline.resolve(" , "), Err(PipelineError::Resolve(_))));
    }

    #[tokio::test]
    async fn default_probe_decodes_next_gen_formats() {
        let fetcher = RecordingFetcher::new().shared();
        let pipeline = quiet(Pipeline::builder(Document::new(), fetcher.clone()))
            .build()
            .await
            .unwrap();

        assert!(pipeline.probe(&Feature::NextGenImage(assetflow_cache::ImageFormat::Webp)).await);
        assert!(!pipeline.probe(&Feature::StreamingCompression).await);
        assert_eq!(pipeline.upgrade_format("/img/a.jpg").await, "/img/a.webp");
        assert_eq!(pipeline.capabilities().probes_run(), 3);
    }

    #[tokio::test]
    async fn durations_reach_the_report() {
        let pipeline = quiet(Pipeline::builder(Document::new(), RecordingFetcher::new().shared()))
            .build()
            .await
            .unwrap();
        pipeline.record_duration("render", 4.0);
        pipeline.record_duration("render", 8.0);

        let report = pipeline.report();
        assert_eq!(report.operations["render"].sample_count, 2);
        assert_eq!(report.operations["render"].average, 6.0);
    }
}
