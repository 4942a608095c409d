//! assetflow
//!
//! Decides when and how the images, stylesheets, scripts and lazily defined
//! components of a page get loaded, without blocking the first render.
//!
//! - Stylesheets and scripts are classified by name and rewritten once
//!   (inert media, `async`/`defer`, preload hints for critical assets).
//! - Images wait for visibility, then resolve their responsive candidate,
//!   upgrade to a next-gen format when possible and swap in only after a
//!   successful preload.
//! - Component placeholders mount on visibility through a single-flight
//!   loader.
//! - Everything reports durations (and memory, where available) to telemetry.
//!
//! # Example
//!
//! ```rust,no_run
//! use assetflow::{Pipeline, PipelineConfig};
//! use assetflow_dom::{Document, Fetcher};
//! use std::sync::Arc;
//!
//! # async fn example(fetcher: Arc<dyn Fetcher>) -> Result<(), assetflow::PipelineError> {
//! let document = Document::new();
//! let pipeline = Pipeline::builder(document, fetcher)
//!     .config(PipelineConfig::from_toml_str("[visibility]\nmode = \"polling\"")?)
//!     .build()
//!     .await?;
//!
//! pipeline.start();
//! pipeline.settled().await;
//! println!("{:?}", pipeline.stats());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod pipeline;
pub mod simulate;

pub use assetflow_image::resolve;
pub use config::{PipelineConfig, VisibilityConfig, VisibilityMode};
pub use error::{ConfigError, PipelineError};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use simulate::{
    simulate, BuiltPage, ComponentFixture, ComponentOutcome, FetchFixture, FixtureFetcher, ImageFixture,
    ImageOutcome, PageFixture, ScriptFixture, SimulationReport, StylesheetFixture, ViewportFixture,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a pipeline
    pub use crate::{Pipeline, PipelineConfig, PipelineError, VisibilityMode};
    pub use assetflow_cache::Feature;
    pub use assetflow_dom::{Document, Fetcher, NodeId, Tag, Viewport};
    pub use assetflow_image::ImageState;
    pub use assetflow_optimizer::{AssetKind, AssetStatus, Classification};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
