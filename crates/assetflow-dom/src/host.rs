//! Host effects: network access and layout

use crate::document::Document;
use crate::element::NodeId;
use crate::error::FetchError;
use crate::geometry::{Rect, Viewport};
use async_trait::async_trait;

/// Network access provided by the host
///
/// Implementations wrap whatever the runtime offers (an off-DOM `Image`
/// object and `fetch(..., { method: "HEAD" })` in a browser, an HTTP client
/// in a headless renderer, a table in tests).
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Load and decode an image without attaching it to the document
    ///
    /// # Errors
    /// Any [`FetchError`] means the image is not displayable.
    async fn preload_image(&self, url: &str) -> Result<(), FetchError>;

    /// Metadata-only existence check
    ///
    /// `Ok(false)` is a definitive "not there"; `Err` means the check itself
    /// could not be completed.
    ///
    /// # Errors
    /// Transport failures.
    async fn exists(&self, url: &str) -> Result<bool, FetchError>;
}

/// Element geometry for hosts without a native visibility signal
pub trait LayoutSource: Send + Sync {
    /// Current viewport
    fn viewport(&self) -> Viewport;

    /// Layout box of `node`, `None` when it is not laid out
    fn bounds(&self, node: NodeId) -> Option<Rect>;
}

impl LayoutSource for Document {
    fn viewport(&self) -> Viewport {
        Document::viewport(self)
    }

    fn bounds(&self, node: NodeId) -> Option<Rect> {
        Document::bounds(self, node)
    }
}
