//! assetflow optimizer
//!
//! Watches a [`Document`](assetflow_dom::Document) for stylesheets, scripts
//! and images and rewrites each one once:
//!
//! | Asset      | Critical                         | Non-critical                          |
//! |------------|----------------------------------|---------------------------------------|
//! | stylesheet | untouched, preload hint          | `media="print"` until it loads        |
//! | script     | `defer`, preload hint            | `async`                               |
//! | image      | lazy image pipeline, preload hint | lazy image pipeline                   |
//!
//! Criticality is a case-insensitive match of the URL path against
//! [`DEFAULT_CRITICAL_PATTERNS`] (or the configured list). Every URL gets one
//! [`AssetRecord`] whose status only moves forward.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod classify;
pub mod error;
pub mod hints;
pub mod optimizer;
pub mod record;

pub use classify::{Classifier, DEFAULT_CRITICAL_PATTERNS};
pub use error::OptimizeError;
pub use hints::{HintSet, ResourceHint};
pub use optimizer::{AssetOptimizer, OptimizerConfig};
pub use record::{AssetKind, AssetRecord, AssetStats, AssetStatus, AssetTable, Classification};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
