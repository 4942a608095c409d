//! Registration table and one-shot firing

use crate::options::{ObserveOptions, SignalMode};
use assetflow_dom::{LayoutSource, NodeId, Rect};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

type Callback = Box<dyn FnOnce(NodeId) + Send>;

/// Handle returned by [`VisibilityScheduler::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration {
    id: u64,
    target: NodeId,
}

impl Registration {
    /// Observed element
    #[inline]
    #[must_use]
    pub fn target(&self) -> NodeId {
        self.target
    }
}

/// One intersection update pushed by a native host
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionEntry {
    /// Element the update is about
    pub target: NodeId,
    /// Its current layout box
    pub target_rect: Rect,
    /// Viewport without any margin
    pub root_rect: Rect,
}

struct Watch {
    target: NodeId,
    options: ObserveOptions,
    callback: Callback,
}

struct Inner {
    mode: SignalMode,
    next_id: AtomicU64,
    watches: Mutex<IndexMap<u64, Watch>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

/// Fires a callback once per registration when its target nears the viewport
///
/// Cheap to clone; clones share the registration table.
#[derive(Clone)]
pub struct VisibilityScheduler {
    inner: Arc<Inner>,
}

impl VisibilityScheduler {
    /// Create a scheduler for `mode`
    #[must_use]
    pub fn new(mode: SignalMode) -> Self {
        Self {
            inner: Arc::new(Inner {
                mode,
                next_id: AtomicU64::new(1),
                watches: Mutex::new(IndexMap::new()),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Signal mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> SignalMode {
        self.inner.mode
    }

    /// Call `on_visible` once, when `target` nears the viewport
    ///
    /// With [`SignalMode::Unavailable`] the callback runs before this returns,
    /// so callers must not hold locks the callback needs.
    pub fn observe<F>(&self, target: NodeId, options: ObserveOptions, on_visible: F) -> Registration
    where
        F: FnOnce(NodeId) + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration { id, target };

        if self.inner.mode.is_eager() {
            tracing::debug!(%target, "no visibility signal, firing eagerly");
            on_visible(target);
            return registration;
        }

        self.inner.watches.lock().insert(
            id,
            Watch {
                target,
                options,
                callback: Box::new(on_visible),
            },
        );
        tracing::debug!(%target, registration = id, "observing");
        registration
    }

    /// Cancel a pending registration
    ///
    /// Returns `false` if it already fired or was cancelled.
    pub fn unobserve(&self, registration: &Registration) -> bool {
        let removed = self.inner.watches.lock().shift_remove(&registration.id).is_some();
        if removed {
            tracing::debug!(target = %registration.target, "unobserved");
        }
        removed
    }

    /// Apply intersection updates from a native host; returns callbacks fired
    pub fn notify(&self, entries: &[IntersectionEntry]) -> usize {
        self.fire_where(|watch| {
            entries
                .iter()
                .filter(|entry| entry.target == watch.target)
                .any(|entry| watch.options.is_visible(&entry.target_rect, &entry.root_rect))
        })
    }

    /// Sample `layout` once; returns callbacks fired
    ///
    /// Targets without a layout box are skipped until they get one.
    pub fn check(&self, layout: &dyn LayoutSource) -> usize {
        let root = layout.viewport().rect();
        self.fire_where(|watch| {
            layout
                .bounds(watch.target)
                .is_some_and(|bounds| watch.options.is_visible(&bounds, &root))
        })
    }

    /// Live registrations
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.watches.lock().len()
    }

    /// Whether `target` has a live registration
    #[must_use]
    pub fn is_observing(&self, target: NodeId) -> bool {
        self.inner.watches.lock().values().any(|watch| watch.target == target)
    }

    fn fire_where(&self, mut due: impl FnMut(&Watch) -> bool) -> usize {
        let fired: Vec<Watch> = {
            let mut watches = self.inner.watches.lock();
            let ids: Vec<u64> = watches
                .iter()
                .filter(|(_, watch)| due(watch))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| watches.shift_remove(id)).collect()
        };

        let count = fired.len();
        for watch in fired {
            tracing::debug!(target = %watch.target, "visible");
            (watch.callback)(watch.target);
        }
        count
    }

    /// Start sampling `layout` on the polling interval
    ///
    /// Returns `false` unless the mode is [`SignalMode::Polling`]. The first
    /// sample is taken immediately.
    pub fn start_polling(&self, layout: Arc<dyn LayoutSource>) -> bool {
        let SignalMode::Polling { interval } = self.inner.mode else {
            return false;
        };
        if interval.is_zero() {
            tracing::warn!("polling interval is zero, polling disabled");
            return false;
        }
        self.stop_polling();

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                VisibilityScheduler { inner }.check(layout.as_ref());
            }
        });
        *self.inner.poller.lock() = Some(handle);
        tracing::debug!(?interval, "visibility polling started");
        true
    }

    /// Stop the polling task; registrations stay pending
    pub fn stop_polling(&self) {
        if let Some(handle) = self.inner.poller.lock().take() {
            handle.abort();
        }
    }

    /// Whether a polling task is running
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for VisibilityScheduler {
    fn default() -> Self {
        Self::new(SignalMode::Native)
    }
}

impl fmt::Debug for VisibilityScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibilityScheduler")
            .field("mode", &self.inner.mode)
            .field("pending", &self.pending())
            .finish()
    }
}
