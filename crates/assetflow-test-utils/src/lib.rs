//! Testing utilities for the assetflow workspace
//!
//! Stub host effects and page fixtures shared by the crate tests.

#![allow(missing_docs)]

use assetflow_dom::{Document, FetchError, Fetcher, NodeId, Rect, Tag, Viewport};
use assetflow_telemetry::{MemorySample, MemorySource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fetcher backed by lists of bad URLs; everything else exists and decodes
#[derive(Debug, Default)]
pub struct RecordingFetcher {
    missing: HashSet<String>,
    broken: HashSet<String>,
    unreachable: HashSet<String>,
    latency: Option<Duration>,
    preloads: Mutex<Vec<String>>,
    checks: Mutex<Vec<String>>,
}

impl RecordingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `exists` answers `false`
    pub fn with_missing(mut self, url: &str) -> Self {
        self.missing.insert(url.to_string());
        self
    }

    /// `preload_image` fails to decode
    pub fn with_broken(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    /// Both calls fail with a network error
    pub fn with_unreachable(mut self, url: &str) -> Self {
        self.unreachable.insert(url.to_string());
        self
    }

    /// Every call sleeps first
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn preloads(&self) -> Vec<String> {
        self.preloads.lock().clone()
    }

    pub fn existence_checks(&self) -> Vec<String> {
        self.checks.lock().clone()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn preload_image(&self, url: &str) -> Result<(), FetchError> {
        self.preloads.lock().push(url.to_string());
        self.delay().await;
        if self.unreachable.contains(url) {
            return Err(FetchError::network(url, "connection refused"));
        }
        if self.broken.contains(url) || self.missing.contains(url) {
            return Err(FetchError::decode(url, "not an image"));
        }
        Ok(())
    }

    async fn exists(&self, url: &str) -> Result<bool, FetchError> {
        self.checks.lock().push(url.to_string());
        self.delay().await;
        if self.unreachable.contains(url) {
            return Err(FetchError::network(url, "connection refused"));
        }
        Ok(!self.missing.contains(url))
    }
}

/// Memory source returning a fixed reading
#[derive(Debug)]
pub struct FixedMemory {
    pub used_mb: f64,
    pub reads: AtomicUsize,
}

impl FixedMemory {
    pub fn new(used_mb: f64) -> Arc<Self> {
        Arc::new(Self {
            used_mb,
            reads: AtomicUsize::new(0),
        })
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl MemorySource for FixedMemory {
    fn sample(&self) -> Option<MemorySample> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Some(MemorySample::from_mb(self.used_mb, 1024.0, 4096.0))
    }
}

/// Memory source for runtimes without introspection
#[derive(Debug, Default)]
pub struct NoMemory;

impl MemorySource for NoMemory {
    fn sample(&self) -> Option<MemorySample> {
        None
    }
}

/// Nodes created by a [`PageBuilder`]
#[derive(Debug, Clone)]
pub struct Page {
    pub document: Document,
    pub stylesheets: Vec<NodeId>,
    pub scripts: Vec<NodeId>,
    pub images: Vec<NodeId>,
    pub components: Vec<NodeId>,
}

impl Page {
    /// Scroll so the whole page is inside the viewport
    pub fn reveal_all(&self) {
        let viewport = self.document.viewport();
        self.document.set_viewport(Viewport {
            height: 1_000_000.0,
            ..viewport
        });
    }
}

/// Builds a document with laid-out assets, one row of 400 px per element
pub struct PageBuilder {
    page: Page,
    next_y: f64,
}

impl PageBuilder {
    pub fn new() -> Self {
        Self::with_viewport(Viewport::new(1000.0, 800.0, 1.0))
    }

    pub fn with_viewport(viewport: Viewport) -> Self {
        Self {
            page: Page {
                document: Document::with_viewport(viewport),
                stylesheets: Vec::new(),
                scripts: Vec::new(),
                images: Vec::new(),
                components: Vec::new(),
            },
            next_y: 0.0,
        }
    }

    pub fn stylesheet(mut self, href: &str) -> Self {
        let document = &self.page.document;
        let link = document
            .append_new(document.head(), Tag::Link, &[("rel", "stylesheet"), ("href", href)])
            .unwrap();
        self.page.stylesheets.push(link);
        self
    }

    pub fn script(mut self, src: &str) -> Self {
        let document = &self.page.document;
        let script = document
            .append_new(document.body(), Tag::Script, &[("src", src)])
            .unwrap();
        self.page.scripts.push(script);
        self
    }

    /// Image with a deferred source
    pub fn image(self, data_src: &str) -> Self {
        self.image_with(&[("data-src", data_src)])
    }

    /// Image with arbitrary attributes, placed below the previous row
    pub fn image_with(mut self, attributes: &[(&str, &str)]) -> Self {
        let img = self.placed(Tag::Img, attributes);
        self.page.images.push(img);
        self
    }

    /// Lazy component placeholder
    pub fn component(mut self, identity: &str) -> Self {
        let container = self.placed(Tag::Div, &[("data-component", identity)]);
        self.page.components.push(container);
        self
    }

    /// Leave `height` px of empty space
    pub fn spacer(mut self, height: f64) -> Self {
        self.next_y += height;
        self
    }

    fn placed(&mut self, tag: Tag, attributes: &[(&str, &str)]) -> NodeId {
        let document = &self.page.document;
        let node = document.append_new(document.body(), tag, attributes).unwrap();
        document
            .set_bounds(node, Rect::new(0.0, self.next_y, 400.0, 300.0))
            .unwrap();
        self.next_y += 400.0;
        node
    }

    pub fn build(self) -> Page {
        self.page
    }
}

impl Default for PageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
