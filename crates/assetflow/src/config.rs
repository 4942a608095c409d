//! Pipeline configuration
//!
//! Every section and field is optional in TOML; missing values take the
//! defaults below.
//!
//! ```toml
//! [visibility]
//! root_margin = 50.0
//! threshold = 0.01
//! mode = "native"          # native | polling | unavailable
//! poll_interval_ms = 250
//!
//! [images]
//! target_format = "webp"
//! upgradeable_extensions = ["jpg", "jpeg", "png"]
//! existence_check_attempts = 1
//!
//! [optimizer]
//! critical_patterns = ["main", "runtime", "vendor", "critical", "above-fold"]
//! inert_media = "print"
//!
//! [telemetry]
//! memory_interval_ms = 10000
//! memory_warning_mb = 50.0
//! ```

use crate::error::ConfigError;
use assetflow_cache::ImageFormat;
use assetflow_image::ResolverConfig;
use assetflow_optimizer::OptimizerConfig;
use assetflow_scheduler::{ObserveOptions, SignalMode};
use assetflow_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How visibility is detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityMode {
    /// Host pushes intersection updates
    #[default]
    Native,
    /// Sample element layout on an interval
    Polling,
    /// Treat everything as visible immediately
    Unavailable,
}

/// `[visibility]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Margin around the viewport that already counts as visible
    pub root_margin: f64,
    /// Fraction of the target area that must intersect
    pub threshold: f64,
    /// Signal source
    pub mode: VisibilityMode,
    /// Polling period, also used when native signals turn out unsupported
    pub poll_interval_ms: u64,
}

impl VisibilityConfig {
    /// Registration options for the scheduler
    #[inline]
    #[must_use]
    pub fn observe_options(&self) -> ObserveOptions {
        ObserveOptions::default()
            .with_root_margin(self.root_margin)
            .with_threshold(self.threshold)
    }

    /// Polling period
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Signal mode as configured, before capability checks
    #[must_use]
    pub fn signal_mode(&self) -> SignalMode {
        match self.mode {
            VisibilityMode::Native => SignalMode::Native,
            VisibilityMode::Polling => SignalMode::Polling {
                interval: self.poll_interval(),
            },
            VisibilityMode::Unavailable => SignalMode::Unavailable,
        }
    }
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        let options = ObserveOptions::default();
        Self {
            root_margin: options.root_margin,
            threshold: options.threshold,
            mode: VisibilityMode::Native,
            poll_interval_ms: 250,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Visibility scheduling
    pub visibility: VisibilityConfig,
    /// Responsive images and format upgrades
    pub images: ResolverConfig,
    /// Asset classification and rewriting
    pub optimizer: OptimizerConfig,
    /// Duration and memory telemetry
    pub telemetry: TelemetryConfig,
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// [`ConfigError::Parse`] for malformed input, [`ConfigError::Invalid`]
    /// for out-of-range values
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`PipelineConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&input)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let visibility = &self.visibility;
        if !(0.0..=1.0).contains(&visibility.threshold) {
            return Err(ConfigError::invalid(
                "visibility.threshold",
                format!("must be within [0, 1], got {}", visibility.threshold),
            ));
        }
        if !visibility.root_margin.is_finite() {
            return Err(ConfigError::invalid("visibility.root_margin", "must be finite"));
        }
        if visibility.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("visibility.poll_interval_ms", "must be positive"));
        }
        if self.images.existence_check_attempts == 0 {
            return Err(ConfigError::invalid("images.existence_check_attempts", "must be positive"));
        }
        if self.optimizer.inert_media.trim().is_empty() {
            return Err(ConfigError::invalid("optimizer.inert_media", "must not be empty"));
        }
        if self.telemetry.memory_interval_ms == 0 {
            return Err(ConfigError::invalid("telemetry.memory_interval_ms", "must be positive"));
        }
        if self.telemetry.memory_history == 0 {
            return Err(ConfigError::invalid("telemetry.memory_history", "must be positive"));
        }
        Ok(())
    }

    /// With visibility mode
    #[inline]
    #[must_use]
    pub fn with_visibility_mode(mut self, mode: VisibilityMode) -> Self {
        self.visibility.mode = mode;
        self
    }

    /// With root margin
    #[inline]
    #[must_use]
    pub fn with_root_margin(mut self, root_margin: f64) -> Self {
        self.visibility.root_margin = root_margin;
        self
    }

    /// With visibility threshold
    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.visibility.threshold = threshold;
        self
    }

    /// With polling period
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.visibility.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With upgrade target format
    #[inline]
    #[must_use]
    pub fn with_target_format(mut self, format: ImageFormat) -> Self {
        self.images = self.images.with_target_format(format);
        self
    }

    /// With existence-check attempts
    #[inline]
    #[must_use]
    pub fn with_existence_check_attempts(mut self, attempts: u32) -> Self {
        self.images = self.images.with_existence_check_attempts(attempts);
        self
    }

    /// With critical patterns
    #[must_use]
    pub fn with_critical_patterns<S: Into<String>>(mut self, patterns: impl IntoIterator<Item = S>) -> Self {
        self.optimizer = self.optimizer.with_critical_patterns(patterns);
        self
    }

    /// With telemetry settings
    #[inline]
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }
}
