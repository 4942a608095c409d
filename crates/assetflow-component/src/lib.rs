//! assetflow lazy components
//!
//! Expensive UI subtrees stand in the page as placeholders
//! (`<div data-component="gallery">`). [`LazyComponents::mount`] waits for the
//! placeholder to become visible, loads the implementation through a
//! single-flight loader keyed by identity and renders it. Every placeholder of
//! the same identity shares one factory call.
//!
//! A failed load or render leaves an explicit `.component-error` placeholder
//! inside the container; mounting it again retries.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod lazy;
pub mod registry;

pub use error::ComponentError;
pub use lazy::{LazyComponents, MountState, COMPONENT_ATTRIBUTE, COMPONENT_LOAD_OPERATION, ERROR_PLACEHOLDER_CLASS};
pub use registry::{Component, ComponentRegistry, SharedComponent};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
