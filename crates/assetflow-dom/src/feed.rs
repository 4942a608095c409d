//! Document change feed
//!
//! Every structural change and every load notification the host reports is
//! stamped with a monotonically increasing sequence number and broadcast to
//! all subscribers. Consumers compare the last sequence they handled with
//! [`Document::last_sequence`](crate::Document::last_sequence) to know when
//! they have caught up.

use crate::element::NodeId;
use tokio::sync::broadcast;

/// Something that happened to the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    /// `node` (and its whole subtree) was attached under `parent` in a
    /// connected part of the tree
    Inserted {
        /// New parent
        parent: NodeId,
        /// Root of the inserted subtree
        node: NodeId,
    },
    /// `node` was detached from the connected tree
    Removed {
        /// Root of the removed subtree
        node: NodeId,
    },
    /// The host finished loading the resource behind `node`
    Loaded {
        /// Element whose resource loaded
        node: NodeId,
    },
    /// The host failed to load the resource behind `node`
    LoadFailed {
        /// Element whose resource failed
        node: NodeId,
    },
}

/// A sequenced [`DomEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    /// Position in the document's event stream, starting at 1
    pub sequence: u64,
    /// The event
    pub event: DomEvent,
}

/// Item yielded by [`ChangeFeed::next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedItem {
    /// A change, in order
    Change(Change),
    /// The subscriber fell behind and `skipped` changes were dropped
    Lagged {
        /// Number of dropped changes
        skipped: u64,
    },
}

/// Subscription to a document's change stream
#[derive(Debug)]
pub struct ChangeFeed {
    rx: broadcast::Receiver<Change>,
}

impl ChangeFeed {
    pub(crate) fn new(rx: broadcast::Receiver<Change>) -> Self {
        Self { rx }
    }

    /// Wait for the next item
    ///
    /// Returns `None` once the document has been dropped.
    pub async fn next(&mut self) -> Option<FeedItem> {
        match self.rx.recv().await {
            Ok(change) => Some(FeedItem::Change(change)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => Some(FeedItem::Lagged { skipped }),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Next item if one is already buffered
    pub fn try_next(&mut self) -> Option<FeedItem> {
        match self.rx.try_recv() {
            Ok(change) => Some(FeedItem::Change(change)),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Some(FeedItem::Lagged { skipped })
            }
            Err(_) => None,
        }
    }
}
