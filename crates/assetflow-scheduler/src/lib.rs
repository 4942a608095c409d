//! assetflow visibility scheduler
//!
//! Registration table plus one-shot callbacks. A target fires at most once per
//! registration and is unregistered before its callback runs; observing it
//! again starts a new cycle.
//!
//! The signal comes from one of three places, chosen once per scheduler:
//!
//! | mode | source |
//! |------|--------|
//! | [`SignalMode::Native`] | host intersection updates via [`VisibilityScheduler::notify`] |
//! | [`SignalMode::Polling`] | a tokio interval sampling a [`LayoutSource`](assetflow_dom::LayoutSource) |
//! | [`SignalMode::Unavailable`] | none; callbacks fire inside `observe` |

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod options;
pub mod scheduler;

pub use options::{ObserveOptions, SignalMode};
pub use scheduler::{IntersectionEntry, Registration, VisibilityScheduler};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
