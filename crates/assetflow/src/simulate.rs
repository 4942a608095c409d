//! Headless page simulation
//!
//! A [`PageFixture`] describes a page in TOML: the viewport, the assets in
//! markup order, lazily mounted components and which URLs the simulated
//! network treats as broken. [`simulate`] runs the full pipeline over it,
//! reveals the whole page and reports what happened.
//!
//! ```toml
//! [viewport]
//! width = 1280.0
//! height = 800.0
//! device_pixel_ratio = 2.0
//!
//! [[stylesheet]]
//! href = "/css/main.css"
//!
//! [[script]]
//! src = "/js/analytics.js"
//!
//! [[image]]
//! data_src = "/img/hero.jpg"
//! srcset = "/img/hero-640.jpg 640w, /img/hero-1280.jpg 1280w"
//!
//! [[component]]
//! identity = "gallery"
//!
//! [fetch]
//! broken = ["/img/hero-1280.jpg"]
//! missing = ["/img/hero-640.webp"]
//! ```

use crate::config::PipelineConfig;
use crate::error::{ConfigError, PipelineError};
use crate::pipeline::Pipeline;
use assetflow_component::{Component, ComponentRegistry, MountState, SharedComponent};
use assetflow_dom::{Document, DomError, FetchError, Fetcher, NodeId, Rect, Tag, Viewport};
use assetflow_image::ImageState;
use assetflow_optimizer::{AssetRecord, AssetStats};
use assetflow_scheduler::SignalMode;
use assetflow_telemetry::TelemetryReport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Vertical room per laid-out image or component
const SLOT_HEIGHT: f64 = 400.0;

/// `[viewport]` of a fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportFixture {
    /// CSS width
    pub width: f64,
    /// CSS height
    pub height: f64,
    /// Device pixel ratio
    pub device_pixel_ratio: f64,
}

impl Default for ViewportFixture {
    fn default() -> Self {
        let viewport = Viewport::default();
        Self {
            width: viewport.width,
            height: viewport.height,
            device_pixel_ratio: viewport.device_pixel_ratio,
        }
    }
}

/// `[[stylesheet]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylesheetFixture {
    /// Stylesheet URL
    pub href: String,
    /// Authored media query
    #[serde(default)]
    pub media: Option<String>,
}

/// `[[script]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptFixture {
    /// Script URL
    pub src: String,
    /// Extra attributes, e.g. `{ defer = "" }` or `{ "data-sync" = "" }`
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// `[[image]]` entry; at least one source attribute is expected
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageFixture {
    /// Deferred source
    pub data_src: Option<String>,
    /// Eager source
    pub src: Option<String>,
    /// Responsive descriptors
    pub srcset: Option<String>,
    /// Distance from the top of the page; placed below the previous slot when unset
    pub top: Option<f64>,
}

/// `[[component]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentFixture {
    /// Registered identity
    pub identity: String,
    /// Whether loading the implementation fails
    #[serde(default)]
    pub fail: bool,
    /// Distance from the top of the page
    #[serde(default)]
    pub top: Option<f64>,
}

/// `[fetch]` section: simulated network behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchFixture {
    /// URLs that do not exist
    pub missing: BTreeSet<String>,
    /// URLs that exist but do not decode
    pub broken: BTreeSet<String>,
    /// URLs whose requests fail in transport
    pub unreachable: BTreeSet<String>,
    /// Delay added to every request
    pub latency_ms: u64,
}

/// A page description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageFixture {
    /// Viewport
    pub viewport: ViewportFixture,
    /// Stylesheet links in `<head>`
    #[serde(rename = "stylesheet")]
    pub stylesheets: Vec<StylesheetFixture>,
    /// Scripts in `<body>`
    #[serde(rename = "script")]
    pub scripts: Vec<ScriptFixture>,
    /// Images in `<body>`
    #[serde(rename = "image")]
    pub images: Vec<ImageFixture>,
    /// Component placeholders in `<body>`
    #[serde(rename = "component")]
    pub components: Vec<ComponentFixture>,
    /// Network behaviour
    pub fetch: FetchFixture,
}

/// Nodes of a built fixture
#[derive(Debug, Clone)]
pub struct BuiltPage {
    /// The document
    pub document: Document,
    /// Image elements in fixture order
    pub images: Vec<NodeId>,
    /// Component containers in fixture order
    pub components: Vec<NodeId>,
}

impl PageFixture {
    /// Parse a fixture
    ///
    /// # Errors
    /// [`ConfigError::Parse`] for malformed input
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Read and parse a fixture file
    ///
    /// # Errors
    /// [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`PageFixture::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Build the document; images and components are laid out top to bottom
    ///
    /// # Errors
    /// [`DomError::InvalidAttribute`] for a bad script attribute name
    pub fn build(&self) -> Result<BuiltPage, DomError> {
        let viewport = Viewport::new(
            self.viewport.width,
            self.viewport.height,
            self.viewport.device_pixel_ratio,
        );
        let document = Document::with_viewport(viewport);
        let head = document.head();
        let body = document.body();

        for sheet in &self.stylesheets {
            let mut attributes = vec![("rel", "stylesheet"), ("href", sheet.href.as_str())];
            if let Some(media) = &sheet.media {
                attributes.push(("media", media.as_str()));
            }
            document.append_new(head, Tag::Link, &attributes)?;
        }

        for script in &self.scripts {
            let mut attributes = vec![("src", script.src.as_str())];
            attributes.extend(script.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            document.append_new(body, Tag::Script, &attributes)?;
        }

        let mut cursor = 0.0;
        let mut place = |node: NodeId, top: Option<f64>| -> Result<(), DomError> {
            let y = top.unwrap_or(cursor);
            cursor = y + SLOT_HEIGHT;
            document.set_bounds(node, Rect::new(0.0, y, 400.0, 300.0))
        };

        let mut images = Vec::with_capacity(self.images.len());
        for image in &self.images {
            let attributes: Vec<(&str, &str)> = [
                ("data-src", &image.data_src),
                ("src", &image.src),
                ("data-srcset", &image.srcset),
            ]
            .into_iter()
            .filter_map(|(name, value)| value.as_deref().map(|value| (name, value)))
            .collect();
            // Bounds before insertion so the optimizer sees a laid-out element
            let node = document.create_element_with(Tag::Img, &attributes)?;
            place(node, image.top)?;
            document.append_child(body, node)?;
            images.push(node);
        }

        let mut components = Vec::with_capacity(self.components.len());
        for component in &self.components {
            let node = document.create_element_with(Tag::Div, &[("data-component", component.identity.as_str())])?;
            place(node, component.top)?;
            document.append_child(body, node)?;
            components.push(node);
        }

        Ok(BuiltPage {
            document,
            images,
            components,
        })
    }

    /// Registry with a stand-in implementation for every fixture component
    #[must_use]
    pub fn registry(&self) -> Arc<ComponentRegistry> {
        let registry = ComponentRegistry::new();
        for component in &self.components {
            let identity = component.identity.clone();
            let fail = component.fail;
            registry.register(component.identity.clone(), move || {
                let identity = identity.clone();
                async move {
                    if fail {
                        anyhow::bail!("chunk for '{identity}' failed to load");
                    }
                    Ok(Arc::new(StandIn { identity }) as SharedComponent)
                }
            });
        }
        Arc::new(registry)
    }

    /// Bottom edge of the laid-out content
    fn content_height(&self) -> f64 {
        let slots = self.images.iter().map(|image| image.top).chain(self.components.iter().map(|c| c.top));
        let mut cursor: f64 = 0.0;
        let mut bottom: f64 = 0.0;
        for top in slots {
            let y = top.unwrap_or(cursor);
            cursor = y + SLOT_HEIGHT;
            bottom = bottom.max(cursor);
        }
        bottom
    }
}

/// Component that renders a labelled body
struct StandIn {
    identity: String,
}

impl Component for StandIn {
    fn render(&self, document: &Document, container: NodeId) -> anyhow::Result<()> {
        document.append_new(
            container,
            Tag::Div,
            &[("class", "component-body"), ("data-rendered", self.identity.as_str())],
        )?;
        Ok(())
    }
}

/// [`Fetcher`] driven by a [`FetchFixture`]
#[derive(Debug, Clone, Default)]
pub struct FixtureFetcher {
    fetch: FetchFixture,
}

impl FixtureFetcher {
    /// Create fetcher
    #[must_use]
    pub fn new(fetch: FetchFixture) -> Self {
        Self { fetch }
    }

    async fn delay(&self) {
        if self.fetch.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.fetch.latency_ms)).await;
        }
    }
}

#[async_trait]
impl Fetcher for FixtureFetcher {
    async fn preload_image(&self, url: &str) -> Result<(), FetchError> {
        self.delay().await;
        if self.fetch.unreachable.contains(url) {
            return Err(FetchError::network(url, "simulated transport failure"));
        }
        if self.fetch.missing.contains(url) {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if self.fetch.broken.contains(url) {
            return Err(FetchError::decode(url, "simulated decode failure"));
        }
        Ok(())
    }

    async fn exists(&self, url: &str) -> Result<bool, FetchError> {
        self.delay().await;
        if self.fetch.unreachable.contains(url) {
            return Err(FetchError::network(url, "simulated transport failure"));
        }
        Ok(!self.fetch.missing.contains(url))
    }
}

/// Final state of one image element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOutcome {
    /// Element
    pub node: NodeId,
    /// Displayed source
    pub src: Option<String>,
    /// Task state
    pub state: Option<ImageState>,
}

/// Final state of one component container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentOutcome {
    /// Identity
    pub identity: String,
    /// Mount state
    pub state: Option<MountState>,
}

/// Everything a simulation run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Visibility mode after capability checks
    pub signal_mode: String,
    /// Asset records in discovery order
    pub assets: Vec<AssetRecord>,
    /// Asset counts per status
    pub stats: AssetStats,
    /// Images in fixture order
    pub images: Vec<ImageOutcome>,
    /// Components in fixture order
    pub components: Vec<ComponentOutcome>,
    /// Telemetry snapshot
    pub telemetry: TelemetryReport,
}

impl SimulationReport {
    /// Human-readable summary
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = format!("visibility: {}\n\nassets:\n", self.signal_mode);
        for record in &self.assets {
            out.push_str(&format!(
                "  {:<10} {:<12} {:<9} {}",
                record.kind.as_str(),
                record.classification.as_str(),
                record.status,
                record.url
            ));
            if let Some(error) = &record.error {
                out.push_str(&format!("  ({error})"));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "  pending={} optimizing={} optimized={} error={}\n",
            self.stats.pending, self.stats.optimizing, self.stats.optimized, self.stats.error
        ));

        out.push_str("\nimages:\n");
        for image in &self.images {
            let state = image.state.map_or("-", |state| state.as_str());
            out.push_str(&format!("  {:<9} {}\n", state, image.src.as_deref().unwrap_or("-")));
        }

        if !self.components.is_empty() {
            out.push_str("\ncomponents:\n");
            for component in &self.components {
                let state = component.state.map_or("-", MountState::as_str);
                out.push_str(&format!("  {:<9} {}\n", state, component.identity));
            }
        }

        out.push_str("\ntelemetry:\n");
        for (name, stats) in &self.telemetry.operations {
            out.push_str(&format!(
                "  {name:<20} n={:<4} avg={:.2}ms min={:.2}ms max={:.2}ms\n",
                stats.sample_count, stats.average, stats.min, stats.max
            ));
        }
        if let Some(memory) = &self.telemetry.memory {
            out.push_str(&format!("  memory used={:.1}MB total={:.1}MB\n", memory.used_mb, memory.total_mb));
        }
        for warning in &self.telemetry.warnings {
            out.push_str(&format!("  warning: {}\n", warning.message));
        }
        out
    }
}

/// Run the pipeline over `fixture`, reveal the whole page and wait for it to settle
///
/// # Errors
/// [`PipelineError`] if the fixture or configuration is invalid
pub async fn simulate(fixture: &PageFixture, config: PipelineConfig) -> Result<SimulationReport, PipelineError> {
    let page = fixture.build()?;
    let document = page.document.clone();
    let pipeline = Pipeline::builder(document.clone(), Arc::new(FixtureFetcher::new(fixture.fetch.clone())))
        .config(config)
        .registry(fixture.registry())
        .build()
        .await?;

    pipeline.start();
    pipeline.settled().await;

    let viewport = document.viewport();
    document.set_viewport(Viewport {
        height: viewport.height.max(fixture.content_height()),
        ..viewport
    });
    let revealed = pipeline.check_visibility();
    tracing::debug!(revealed, "page revealed");
    pipeline.settled().await;
    pipeline.stop();

    let images = page
        .images
        .iter()
        .map(|node| ImageOutcome {
            node: *node,
            src: document.attribute(*node, "src"),
            state: pipeline.images().state(*node),
        })
        .collect();
    let components = page
        .components
        .iter()
        .zip(&fixture.components)
        .map(|(node, component)| ComponentOutcome {
            identity: component.identity.clone(),
            state: pipeline.components().state(*node),
        })
        .collect();
    let signal_mode = match pipeline.signal_mode() {
        SignalMode::Native => "native".to_string(),
        SignalMode::Polling { interval } => format!("polling every {}ms", interval.as_millis()),
        SignalMode::Unavailable => "unavailable (eager)".to_string(),
    };

    Ok(SimulationReport {
        signal_mode,
        assets: pipeline.records(),
        stats: pipeline.stats(),
        images,
        components,
        telemetry: pipeline.report(),
    })
}
