//! assetflow telemetry
//!
//! The sink every pipeline component reports into. Durations are appended to
//! per-operation series and only aggregated when a report is requested;
//! memory usage is sampled on a fixed interval when the runtime exposes it.
//!
//! # Example
//!
//! ```rust
//! use assetflow_telemetry::Telemetry;
//!
//! let telemetry = Telemetry::default();
//! telemetry.record_duration("image.load", 12.0);
//! telemetry.record_duration("image.load", 18.0);
//!
//! let report = telemetry.report();
//! let stats = &report.operations["image.load"];
//! assert_eq!(stats.sample_count, 2);
//! assert_eq!(stats.average, 15.0);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod aggregator;
pub mod memory;
pub mod timer;

pub use aggregator::{OperationStats, Telemetry, TelemetryConfig, TelemetryReport, TelemetryWarning, WarningKind};
pub use memory::{MemorySample, MemorySource, SystemMemory};
pub use timer::ScopedTimer;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
