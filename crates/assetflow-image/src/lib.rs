//! assetflow images
//!
//! Resolution first, upgrade second:
//!
//! 1. [`resolve`] / [`select`] pick the descriptor candidate for the viewport
//!    (`viewport width × device pixel ratio`).
//! 2. [`ResponsiveResolver::upgrade_format`] swaps in a next-gen sibling when
//!    the runtime decodes it and the host confirms it exists.
//! 3. [`ImagePipeline`] runs both when an element becomes visible, preloads
//!    the winner off-document and swaps `src` only after the preload succeeds.
//!
//! # Example
//!
//! ```rust
//! use assetflow_image::resolve;
//!
//! let url = resolve("a.jpg 400w, b.jpg 800w, c.jpg 1200w", 500.0, 1.0).unwrap();
//! assert_eq!(url, "b.jpg");
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod descriptor;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod state;

pub use descriptor::{parse_srcset, Candidate};
pub use error::{ImageError, ResolveError};
pub use pipeline::{ImagePipeline, ImageStats, IMAGE_LOAD_OPERATION};
pub use resolver::{resolve, select, sibling_url, ResolverConfig, ResponsiveResolver};
pub use state::{allowed_transitions, validate_transition, ImageState};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
