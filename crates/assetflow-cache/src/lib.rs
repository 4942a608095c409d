//! assetflow caches
//!
//! Two deduplicating caches with deliberately different failure policies:
//!
//! - [`CapabilityCache`]: runtime capabilities are constants, so the first
//!   answer (including "unsupported" after a failed probe) is kept forever.
//! - [`SingleFlight`]: loads may fail transiently, so failures are only shared
//!   with the callers of that attempt and the next request tries again.
//!
//! # Example
//!
//! ```rust
//! use assetflow_cache::{LoadStatus, SingleFlight};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), assetflow_cache::LoadError> {
//! let loader: SingleFlight<String, Arc<str>> = SingleFlight::new();
//! let a = loader.load("gallery".to_string(), || async { Ok(Arc::from("impl")) });
//! let b = loader.load("gallery".to_string(), || async { Ok(Arc::from("never built")) });
//! assert!(Arc::ptr_eq(&a.await?, &b.await?));
//! assert_eq!(loader.status(&"gallery".to_string()), LoadStatus::Ready);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod capability;
pub mod error;
pub mod single_flight;

pub use capability::{CapabilityCache, CapabilityProbe, DecodeProbe, Feature, ImageFormat, StaticProbe, Support};
pub use error::{LoadError, ProbeError};
pub use single_flight::{LoadStatus, SingleFlight, Subscription};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
