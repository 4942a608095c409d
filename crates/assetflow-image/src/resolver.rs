//! Responsive source selection and next-gen format upgrades

use crate::descriptor::{parse_srcset, Candidate};
use crate::error::ResolveError;
use assetflow_cache::{CapabilityCache, Feature, ImageFormat};
use assetflow_dom::Fetcher;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Pick the candidate for a viewport
///
/// Sized candidates are ordered by width, unsized ones after them. The first
/// candidate that is unsized or at least `viewport_width * dpr` wide wins;
/// otherwise the widest.
#[must_use]
pub fn select(candidates: &[Candidate], viewport_width: f64, dpr: f64) -> Option<&Candidate> {
    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by_key(|candidate| (candidate.width.is_none(), candidate.width));

    let needed = viewport_width * dpr;
    ordered
        .iter()
        .copied()
        .find(|candidate| !matches!(candidate.width, Some(width) if f64::from(width) < needed))
        .or_else(|| ordered.last().copied())
}

/// Parse `srcset` and pick the URL for a viewport
///
/// # Errors
/// - [`ResolveError::InvalidViewport`] for non-positive width or ratio
/// - [`ResolveError::NoCandidates`] when nothing parses
pub fn resolve(srcset: &str, viewport_width: f64, dpr: f64) -> Result<String, ResolveError> {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if !valid(viewport_width) || !valid(dpr) {
        return Err(ResolveError::InvalidViewport {
            width: viewport_width,
            dpr,
        });
    }
    let candidates = parse_srcset(srcset);
    select(&candidates, viewport_width, dpr)
        .map(|candidate| candidate.url.clone())
        .ok_or(ResolveError::NoCandidates)
}

/// Swap the extension of `url` for `format`, keeping query and fragment
///
/// `None` for data URIs and for extensions outside `upgradeable`.
#[must_use]
pub fn sibling_url(url: &str, format: ImageFormat, upgradeable: &[String]) -> Option<String> {
    if url.starts_with("data:") {
        return None;
    }
    let path_end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    let (path, suffix) = url.split_at(path_end);
    let file_start = path.rfind('/').map_or(0, |slash| slash + 1);
    let dot = file_start + path[file_start..].rfind('.')?;
    let extension = &path[dot + 1..];
    if extension.is_empty()
        || !upgradeable
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(extension))
    {
        return None;
    }
    Some(format!("{}.{}{}", &path[..dot], format.extension(), suffix))
}

/// Resolver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Format to upgrade to
    pub target_format: ImageFormat,
    /// Extensions eligible for upgrade, case-insensitive
    pub upgradeable_extensions: Vec<String>,
    /// Existence-check attempts per derived URL; transport errors retry
    pub existence_check_attempts: u32,
}

impl ResolverConfig {
    /// With target format
    #[inline]
    #[must_use]
    pub fn with_target_format(mut self, format: ImageFormat) -> Self {
        self.target_format = format;
        self
    }

    /// With existence-check attempts
    #[inline]
    #[must_use]
    pub fn with_existence_check_attempts(mut self, attempts: u32) -> Self {
        self.existence_check_attempts = attempts;
        self
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            target_format: ImageFormat::Webp,
            upgradeable_extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
            existence_check_attempts: 1,
        }
    }
}

/// Capability-aware format upgrades
pub struct ResponsiveResolver {
    capabilities: CapabilityCache,
    fetcher: Arc<dyn Fetcher>,
    config: ResolverConfig,
    existence: Cache<String, bool>,
}

impl ResponsiveResolver {
    /// Create resolver
    #[must_use]
    pub fn new(capabilities: CapabilityCache, fetcher: Arc<dyn Fetcher>, config: ResolverConfig) -> Self {
        Self {
            capabilities,
            fetcher,
            config,
            existence: Cache::builder().build(),
        }
    }

    /// Settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Host network access
    #[inline]
    #[must_use]
    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Best next-gen sibling of `url`, or `url` itself
    ///
    /// Falls back to `url` when the format is unsupported, the URL is not
    /// upgradeable, or the sibling cannot be confirmed to exist.
    pub async fn upgrade_format(&self, url: &str) -> String {
        let format = self.config.target_format;
        if !self.capabilities.probe(&Feature::NextGenImage(format)).await {
            return url.to_string();
        }
        let Some(sibling) = sibling_url(url, format, &self.config.upgradeable_extensions) else {
            return url.to_string();
        };
        if self.sibling_exists(&sibling).await {
            tracing::debug!(from = url, to = %sibling, "upgraded image format");
            sibling
        } else {
            url.to_string()
        }
    }

    async fn sibling_exists(&self, sibling: &str) -> bool {
        let fetcher = Arc::clone(&self.fetcher);
        let attempts = self.config.existence_check_attempts.max(1);
        let url = sibling.to_string();
        self.existence
            .get_with(sibling.to_string(), async move {
                for attempt in 1..=attempts {
                    match fetcher.exists(&url).await {
                        Ok(found) => return found,
                        Err(err) => {
                            tracing::debug!(%url, attempt, error = %err, "existence check failed");
                        }
                    }
                }
                false
            })
            .await
    }
}

impl fmt::Debug for ResponsiveResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsiveResolver")
            .field("config", &self.config)
            .field("checked", &self.existence.entry_count())
            .finish_non_exhaustive()
    }
}
