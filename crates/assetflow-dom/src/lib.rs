//! assetflow document model
//!
//! The boundary between the host page and the optimization pipeline. The
//! pipeline never touches a real page directly: a browser binding or a headless
//! renderer mirrors the page into a [`Document`], and the pipeline reads and
//! rewrites that model.
//!
//! # Architecture
//!
//! ```text
//! Host page ──▶ Document (element arena) ──▶ ChangeFeed ──▶ pipeline components
//!                    ▲                                            │
//!                    └────────── attribute / class rewrites ◀─────┘
//! ```
//!
//! Network effects go through [`Fetcher`], so every host interaction can be
//! substituted in tests.
//!
//! # Example
//!
//! ```rust
//! use assetflow_dom::{Document, Tag};
//!
//! let document = Document::new();
//! let img = document
//!     .append_new(document.body(), Tag::Img, &[("data-src", "/hero.jpg")])
//!     .unwrap();
//! assert!(document.is_connected(img));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod document;
pub mod element;
pub mod error;
pub mod feed;
pub mod geometry;
pub mod host;

pub use document::Document;
pub use element::{Element, LoadOutcome, NodeId, Tag};
pub use error::{DomError, FetchError};
pub use feed::{Change, ChangeFeed, DomEvent, FeedItem};
pub use geometry::{Rect, Viewport};
pub use host::{Fetcher, LayoutSource};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the document model
    pub use crate::document::Document;
    pub use crate::element::{LoadOutcome, NodeId, Tag};
    pub use crate::error::{DomError, FetchError};
    pub use crate::feed::{ChangeFeed, DomEvent, FeedItem};
    pub use crate::geometry::{Rect, Viewport};
    pub use crate::host::{Fetcher, LayoutSource};
}
