//! Append-only telemetry aggregation
//!
//! Writers only ever append; aggregation happens on read in [`Telemetry::report`].

use crate::memory::{MemorySample, MemorySource};
use crate::timer::ScopedTimer;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Telemetry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Interval between memory samples, milliseconds
    pub memory_interval_ms: u64,
    /// Used-memory level (MB) above which a sample produces a warning
    pub memory_warning_mb: f64,
    /// Number of memory samples (and warnings) retained
    pub memory_history: usize,
}

impl TelemetryConfig {
    /// Sampling interval as a [`Duration`]
    #[inline]
    #[must_use]
    pub fn memory_interval(&self) -> Duration {
        Duration::from_millis(self.memory_interval_ms)
    }

    /// With sampling interval
    #[inline]
    #[must_use]
    pub fn with_memory_interval(mut self, interval: Duration) -> Self {
        self.memory_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With warning threshold
    #[inline]
    #[must_use]
    pub fn with_memory_warning_mb(mut self, threshold: f64) -> Self {
        self.memory_warning_mb = threshold;
        self
    }
}

impl Default for TelemetryConfig {
    /// 10 s interval, 50 MB warning threshold, one hour of history
    fn default() -> Self {
        Self {
            memory_interval_ms: 10_000,
            memory_warning_mb: 50.0,
            memory_history: 360,
        }
    }
}

/// Aggregate of one operation's duration series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    /// Mean duration, ms
    pub average: f64,
    /// Shortest duration, ms
    pub min: f64,
    /// Longest duration, ms
    pub max: f64,
    /// Number of samples
    pub sample_count: usize,
}

impl OperationStats {
    fn from_series(series: &[f64]) -> Option<Self> {
        if series.is_empty() {
            return None;
        }
        let (min, max, sum) = series.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), &v| (min.min(v), max.max(v), sum + v),
        );
        #[allow(clippy::cast_precision_loss)]
        let average = sum / series.len() as f64;
        Some(Self {
            average,
            min,
            max,
            sample_count: series.len(),
        })
    }
}

/// Kind of report warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A memory sample exceeded the configured threshold
    MemoryThreshold,
}

/// Warning-level report entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryWarning {
    /// What triggered the warning
    pub kind: WarningKind,
    /// Human-readable description
    pub message: String,
    /// The offending sample
    pub sample: MemorySample,
}

/// Snapshot produced by [`Telemetry::report`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    /// Per-operation duration aggregates
    pub operations: BTreeMap<String, OperationStats>,
    /// Most recent memory sample, when sampling is active or has run
    pub memory: Option<MemorySample>,
    /// Warning-level entries
    pub warnings: Vec<TelemetryWarning>,
}

#[derive(Debug)]
struct Inner {
    config: TelemetryConfig,
    series: RwLock<HashMap<String, Vec<f64>>>,
    memory: Mutex<VecDeque<MemorySample>>,
    warnings: Mutex<VecDeque<TelemetryWarning>>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.sampler.get_mut().take() {
            handle.abort();
        }
    }
}

/// Telemetry aggregator
///
/// Cheap to clone; clones share storage.
#[derive(Debug, Clone)]
pub struct Telemetry {
    inner: Arc<Inner>,
}

impl Telemetry {
    /// Create an aggregator
    #[must_use]
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                series: RwLock::new(HashMap::new()),
                memory: Mutex::new(VecDeque::new()),
                warnings: Mutex::new(VecDeque::new()),
                sampler: Mutex::new(None),
            }),
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    /// Append one duration sample for `name`
    ///
    /// Negative and non-finite values are dropped.
    pub fn record_duration(&self, name: &str, ms: f64) {
        if !ms.is_finite() || ms < 0.0 {
            tracing::debug!(operation = name, value = ms, "dropping invalid duration sample");
            return;
        }
        self.inner
            .series
            .write()
            .entry(name.to_string())
            .or_default()
            .push(ms);
        metrics::histogram!("assetflow_operation_duration_ms", "operation" => name.to_string())
            .record(ms);
    }

    /// Start a timer that records under `name` when dropped
    pub fn timer(&self, name: impl Into<String>) -> ScopedTimer {
        ScopedTimer::new(self.clone(), name)
    }

    /// Await `future` and record how long it took under `name`
    pub async fn measure<F: Future>(&self, name: &str, future: F) -> F::Output {
        let timer = self.timer(name);
        let output = future.await;
        timer.stop();
        output
    }

    /// Raw samples recorded for `name`
    #[must_use]
    pub fn samples(&self, name: &str) -> Vec<f64> {
        self.inner
            .series
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Aggregate everything recorded so far
    #[must_use]
    pub fn report(&self) -> TelemetryReport {
        let operations = self
            .inner
            .series
            .read()
            .iter()
            .filter_map(|(name, series)| {
                OperationStats::from_series(series).map(|stats| (name.clone(), stats))
            })
            .collect();

        TelemetryReport {
            operations,
            memory: self.inner.memory.lock().back().copied(),
            warnings: self.inner.warnings.lock().iter().cloned().collect(),
        }
    }

    /// Append a memory sample, raising a warning entry when over threshold
    pub fn record_memory(&self, sample: MemorySample) {
        let cap = self.inner.config.memory_history.max(1);
        {
            let mut memory = self.inner.memory.lock();
            if memory.len() == cap {
                memory.pop_front();
            }
            memory.push_back(sample);
        }

        let threshold = self.inner.config.memory_warning_mb;
        if sample.used_mb > threshold {
            tracing::warn!(
                used_mb = sample.used_mb,
                threshold_mb = threshold,
                "memory usage above threshold"
            );
            let mut warnings = self.inner.warnings.lock();
            if warnings.len() == cap {
                warnings.pop_front();
            }
            warnings.push_back(TelemetryWarning {
                kind: WarningKind::MemoryThreshold,
                message: format!(
                    "memory usage {:.1} MB exceeds {:.1} MB",
                    sample.used_mb, threshold
                ),
                sample,
            });
        }
    }

    /// Retained memory samples, oldest first
    #[must_use]
    pub fn memory_history(&self) -> Vec<MemorySample> {
        self.inner.memory.lock().iter().copied().collect()
    }

    /// Start periodic memory sampling from `source`
    ///
    /// Takes one reading immediately. If the source has nothing to report the
    /// feature is treated as unavailable and no task is started. Must be
    /// called from within a tokio runtime.
    ///
    /// # Returns
    /// Whether sampling is now active
    pub fn start_memory_sampling(&self, source: Arc<dyn MemorySource>) -> bool {
        self.stop_memory_sampling();

        let Some(first) = source.sample() else {
            tracing::debug!("memory introspection unavailable, sampling disabled");
            return false;
        };
        self.record_memory(first);

        let period = self.inner.config.memory_interval();
        if period.is_zero() {
            tracing::debug!("memory interval is zero, periodic sampling disabled");
            return false;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let telemetry = Telemetry { inner };
                match source.sample() {
                    Some(sample) => telemetry.record_memory(sample),
                    None => {
                        tracing::debug!("memory source went away, sampling stopped");
                        break;
                    }
                }
            }
        });
        *self.inner.sampler.lock() = Some(handle);
        tracing::debug!(interval_ms = self.inner.config.memory_interval_ms, "memory sampling started");
        true
    }

    /// Stop periodic memory sampling; retained samples stay in the report
    pub fn stop_memory_sampling(&self) {
        if let Some(handle) = self.inner.sampler.lock().take() {
            handle.abort();
        }
    }

    /// Whether a sampling task is running
    #[must_use]
    pub fn is_sampling(&self) -> bool {
        self.inner
            .sampler
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(TelemetryConfig::default())
    }
}
