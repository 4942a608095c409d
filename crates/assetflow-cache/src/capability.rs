//! Memoized capability detection
//!
//! Backed by a moka future cache: concurrent first lookups of the same feature
//! are coalesced into a single probe, and the answer is kept for the lifetime of
//! the cache (no capacity bound, no expiry).

use crate::error::ProbeError;
use assetflow_dom::{FetchError, Fetcher};
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 1×1 lossy WebP
const WEBP_PROBE: &str =
    "data:image/webp;base64,UklGRiIAAABXRUJQVlA4IBYAAAAwAQCdASoBAAEADsD+JaQAA3AAAAAA";

/// 1×1 AVIF
const AVIF_PROBE: &str = "data:image/avif;base64,AAAAIGZ0eXBhdmlmAAAAAGF2aWZtaWYxbWlhZk1BMUIAAADybWV0YQAAAAAAAAAoaGRscgAAAAAAAAAAcGljdAAAAAAAAAAAAAAAAGxpYmF2aWYAAAAADnBpdG0AAAAAAAEAAAAeaWxvYwAAAABEAAABAAEAAAABAAABGgAAAB0AAAAoaWluZgAAAAAAAQAAABppbmZlAgAAAAABAABhdjAxQ29sb3IAAAAAamlwcnAAAABLaXBjbwAAABRpc3BlAAAAAAAAAAIAAAACAAAAEHBpeGkAAAAAAwgICAAAAAxhdjFDgQ0MAAAAABNjb2xybmNseAACAAIAAYAAAAAXaXBtYQAAAAAAAAABAAEEAQKDBAAAACVtZGF0EgAKCBgANogQEAwgMg8f8D///8WfhwB8+ErK42A=";

/// Next-generation image encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// WebP
    Webp,
    /// AVIF
    Avif,
}

impl ImageFormat {
    /// File extension without the dot
    #[inline]
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }

    /// Tiny inline image used to test decoder support
    #[inline]
    #[must_use]
    pub const fn probe_uri(self) -> &'static str {
        match self {
            Self::Webp => WEBP_PROBE,
            Self::Avif => AVIF_PROBE,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A runtime capability
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Decoder support for a next-gen image format
    NextGenImage(ImageFormat),
    /// Streaming decompression of responses
    StreamingCompression,
    /// Native element-visibility notifications
    VisibilitySignal,
    /// Memory usage introspection
    MemoryIntrospection,
    /// Host-defined feature
    Custom(String),
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NextGenImage(format) => write!(f, "next-gen-image:{format}"),
            Self::StreamingCompression => f.write_str("streaming-compression"),
            Self::VisibilitySignal => f.write_str("visibility-signal"),
            Self::MemoryIntrospection => f.write_str("memory-introspection"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Tri-state capability answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Support {
    /// Not probed yet (or probe still in flight)
    Unknown,
    /// Probed, available
    Supported,
    /// Probed, unavailable or probe failed
    Unsupported,
}

/// Performs the actual runtime check for a feature
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Check whether `feature` is available
    ///
    /// # Errors
    /// Any error is cached as "unsupported" by [`CapabilityCache`].
    async fn check(&self, feature: &Feature) -> Result<bool, ProbeError>;
}

/// Fixed answer table
///
/// For hosts that know their capabilities up front. Features not in the table
/// fail with [`ProbeError::Unknown`].
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    answers: HashMap<Feature, bool>,
}

impl StaticProbe {
    /// Create an empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an answer for `feature`
    #[inline]
    #[must_use]
    pub fn with(mut self, feature: Feature, supported: bool) -> Self {
        self.answers.insert(feature, supported);
        self
    }
}

#[async_trait]
impl CapabilityProbe for StaticProbe {
    async fn check(&self, feature: &Feature) -> Result<bool, ProbeError> {
        self.answers
            .get(feature)
            .copied()
            .ok_or_else(|| ProbeError::Unknown(feature.to_string()))
    }
}

/// Decodes a tiny inline image to test next-gen format support
///
/// Other features are delegated to `fallback`.
pub struct DecodeProbe {
    fetcher: Arc<dyn Fetcher>,
    fallback: Arc<dyn CapabilityProbe>,
}

impl DecodeProbe {
    /// Create probe over the host fetcher
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, fallback: Arc<dyn CapabilityProbe>) -> Self {
        Self { fetcher, fallback }
    }
}

#[async_trait]
impl CapabilityProbe for DecodeProbe {
    async fn check(&self, feature: &Feature) -> Result<bool, ProbeError> {
        let Feature::NextGenImage(format) = feature else {
            return self.fallback.check(feature).await;
        };
        match self.fetcher.preload_image(format.probe_uri()).await {
            Ok(()) => Ok(true),
            Err(FetchError::Decode { .. }) => Ok(false),
            Err(err) => Err(ProbeError::failed(feature, err.to_string())),
        }
    }
}

/// Memoized capability answers
///
/// Each feature is probed at most once per cache; concurrent callers share the
/// in-flight probe.
#[derive(Clone)]
pub struct CapabilityCache {
    probe: Arc<dyn CapabilityProbe>,
    results: Cache<Feature, bool>,
    probes_run: Arc<AtomicUsize>,
}

impl CapabilityCache {
    /// Create cache over `probe`
    #[must_use]
    pub fn new(probe: Arc<dyn CapabilityProbe>) -> Self {
        Self {
            probe,
            results: Cache::builder().build(),
            probes_run: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Whether `feature` is available
    ///
    /// Never fails: probe errors resolve to `false`.
    pub async fn probe(&self, feature: &Feature) -> bool {
        let probe = Arc::clone(&self.probe);
        let probes_run = Arc::clone(&self.probes_run);
        let target = feature.clone();
        self.results
            .get_with(feature.clone(), async move {
                probes_run.fetch_add(1, Ordering::SeqCst);
                match probe.check(&target).await {
                    Ok(supported) => {
                        tracing::debug!(feature = %target, supported, "capability probed");
                        supported
                    }
                    Err(err) => {
                        tracing::debug!(feature = %target, error = %err, "capability probe failed, treating as unsupported");
                        false
                    }
                }
            })
            .await
    }

    /// Cached answer without probing
    pub async fn status(&self, feature: &Feature) -> Support {
        match self.results.get(feature).await {
            Some(true) => Support::Supported,
            Some(false) => Support::Unsupported,
            None => Support::Unknown,
        }
    }

    /// Number of underlying probes performed so far
    #[inline]
    #[must_use]
    pub fn probes_run(&self) -> usize {
        self.probes_run.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CapabilityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityCache")
            .field("probes_run", &self.probes_run())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SlowProbe {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CapabilityProbe for SlowProbe {
        async fn check(&self, _feature: &Feature) -> Result<bool, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(true)
        }
    }

    struct BrokenProbe;

    #[async_trait]
    impl CapabilityProbe for BrokenProbe {
        async fn check(&self, feature: &Feature) -> Result<bool, ProbeError> {
            Err(ProbeError::failed(feature, "decoder crashed"))
        }
    }

    struct DecodeOnly {
        decodes: bool,
    }

    #[async_trait]
    impl Fetcher for DecodeOnly {
        async fn preload_image(&self, url: &str) -> Result<(), FetchError> {
            if self.decodes {
                Ok(())
            } else {
                Err(FetchError::decode(url, "unsupported format"))
            }
        }

        async fn exists(&self, _url: &str) -> Result<bool, FetchError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn answer_is_memoized() {
        let cache = CapabilityCache::new(Arc::new(
            StaticProbe::new().with(Feature::NextGenImage(ImageFormat::Webp), true),
        ));
        let webp = Feature::NextGenImage(ImageFormat::Webp);

        assert_eq!(cache.status(&webp).await, Support::Unknown);
        assert!(cache.probe(&webp).await);
        assert!(cache.probe(&webp).await);
        assert_eq!(cache.status(&webp).await, Support::Supported);
        assert_eq!(cache.probes_run(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_probes_are_coalesced() {
        let probe = Arc::new(SlowProbe {
            calls: AtomicUsize::new(0),
        });
        let cache = CapabilityCache::new(probe.clone());
        let feature = Feature::StreamingCompression;

        let answers = futures::future::join_all((0..10).map(|_| cache.probe(&feature))).await;

        assert!(answers.into_iter().all(|a| a));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_probe_is_unsupported_and_not_retried() {
        let cache = CapabilityCache::new(Arc::new(BrokenProbe));
        let feature = Feature::Custom("webgpu".to_string());

        assert!(!cache.probe(&feature).await);
        assert!(!cache.probe(&feature).await);
        assert_eq!(cache.status(&feature).await, Support::Unsupported);
        assert_eq!(cache.probes_run(), 1);
    }

    #[tokio::test]
    async fn unknown_static_feature_is_unsupported() {
        let cache = CapabilityCache::new(Arc::new(StaticProbe::new()));
        assert!(!cache.probe(&Feature::VisibilitySignal).await);
    }

    #[tokio::test]
    async fn decode_probe_uses_the_fetcher() {
        let fallback: Arc<dyn CapabilityProbe> =
            Arc::new(StaticProbe::new().with(Feature::VisibilitySignal, true));

        let yes = CapabilityCache::new(Arc::new(DecodeProbe::new(
            Arc::new(DecodeOnly { decodes: true }),
            fallback.clone(),
        )));
        assert!(yes.probe(&Feature::NextGenImage(ImageFormat::Avif)).await);
        assert!(yes.probe(&Feature::VisibilitySignal).await);

        let no = CapabilityCache::new(Arc::new(DecodeProbe::new(
            Arc::new(DecodeOnly { decodes: false }),
            fallback,
        )));
        assert!(!no.probe(&Feature::NextGenImage(ImageFormat::Webp)).await);
    }

    #[test]
    fn feature_display() {
        assert_eq!(
            Feature::NextGenImage(ImageFormat::Webp).to_string(),
            "next-gen-image:webp"
        );
        assert_eq!(Feature::Custom("x".into()).to_string(), "custom:x");
    }
}
