//! Single-flight loading
//!
//! One in-flight load per identity; every concurrent caller subscribes to the
//! same shared future. Successes are cached, failures are remembered only until
//! the next request, which starts a fresh attempt.

use crate::error::LoadError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

type Flight<V> = Shared<BoxFuture<'static, Result<V, LoadError>>>;

/// Load state of one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Never requested (or invalidated)
    Idle,
    /// A load is in flight
    Loading,
    /// Loaded; the value is cached
    Ready,
    /// The last attempt failed; the next request retries
    Failed,
}

enum Slot<V> {
    Loading { flight: Flight<V>, waiters: usize },
    Ready(V),
    Failed(LoadError),
}

/// Resolves to the outcome of a [`SingleFlight::load`] request
///
/// Dropping a subscription does not cancel the load.
#[must_use = "subscriptions do nothing unless awaited"]
pub struct Subscription<V> {
    state: SubscriptionState<V>,
}

enum SubscriptionState<V> {
    Resolved(Option<Result<V, LoadError>>),
    Waiting(Flight<V>),
}

impl<V> Subscription<V> {
    fn resolved(outcome: Result<V, LoadError>) -> Self {
        Self {
            state: SubscriptionState::Resolved(Some(outcome)),
        }
    }

    fn waiting(flight: Flight<V>) -> Self {
        Self {
            state: SubscriptionState::Waiting(flight),
        }
    }
}

impl<V> Unpin for Subscription<V> {}

impl<V: Clone> Future for Subscription<V> {
    type Output = Result<V, LoadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            SubscriptionState::Resolved(outcome) => {
                Poll::Ready(outcome.take().expect("Subscription polled after completion"))
            }
            SubscriptionState::Waiting(flight) => flight.poll_unpin(cx),
        }
    }
}

impl<V> fmt::Debug for Subscription<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            SubscriptionState::Resolved(_) => "resolved",
            SubscriptionState::Waiting(_) => "waiting",
        };
        f.debug_struct("Subscription").field("state", &state).finish()
    }
}

/// Identity-keyed single-flight loader
///
/// Cheap to clone; clones share the state table.
pub struct SingleFlight<K, V> {
    slots: Arc<DashMap<K, Slot<V>>>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty loader
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Request the value for `identity`
    ///
    /// - `Ready`: resolves immediately with the cached value.
    /// - `Loading`: attaches to the in-flight load; `loader` is not called.
    /// - `Idle` / `Failed`: starts a new load that calls `loader` exactly once.
    ///
    /// The state moves to `Loading` before this returns, so a second request
    /// issued right after always joins the first. The load is driven by a
    /// spawned task when a tokio runtime is available and otherwise by the
    /// subscribers.
    pub fn load<F, Fut>(&self, identity: K, loader: F) -> Subscription<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let flight = match self.slots.entry(identity.clone()) {
            Entry::Occupied(mut occupied) => {
                let joined = match occupied.get_mut() {
                    Slot::Ready(value) => Some(Subscription::resolved(Ok(value.clone()))),
                    Slot::Loading { flight, waiters } => {
                        *waiters += 1;
                        Some(Subscription::waiting(flight.clone()))
                    }
                    Slot::Failed(_) => None,
                };
                if let Some(subscription) = joined {
                    return subscription;
                }
                tracing::debug!(%identity, "retrying after failed load");
                let flight = self.flight(identity, loader);
                occupied.insert(Slot::Loading {
                    flight: flight.clone(),
                    waiters: 1,
                });
                flight
            }
            Entry::Vacant(vacant) => {
                let flight = self.flight(identity, loader);
                vacant.insert(Slot::Loading {
                    flight: flight.clone(),
                    waiters: 1,
                });
                flight
            }
        };

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(flight.clone());
        }
        Subscription::waiting(flight)
    }

    fn flight<F, Fut>(&self, identity: K, loader: F) -> Flight<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let slots: Weak<DashMap<K, Slot<V>>> = Arc::downgrade(&self.slots);
        async move {
            tracing::debug!(%identity, "load started");
            let outcome = loader()
                .await
                .map_err(|cause| LoadError::new(identity.to_string(), cause));

            match &outcome {
                Ok(_) => tracing::debug!(%identity, "load ready"),
                Err(err) => tracing::warn!(%identity, error = %err, "load failed"),
            }

            if let Some(slots) = slots.upgrade() {
                let settled = match &outcome {
                    Ok(value) => Slot::Ready(value.clone()),
                    Err(err) => Slot::Failed(err.clone()),
                };
                slots.insert(identity, settled);
            }
            outcome
        }
        .boxed()
        .shared()
    }

    /// Current state of `identity`
    #[must_use]
    pub fn status(&self, identity: &K) -> LoadStatus {
        match self.slots.get(identity).as_deref() {
            None => LoadStatus::Idle,
            Some(Slot::Loading { .. }) => LoadStatus::Loading,
            Some(Slot::Ready(_)) => LoadStatus::Ready,
            Some(Slot::Failed(_)) => LoadStatus::Failed,
        }
    }

    /// Cached value, present only when `Ready`
    #[must_use]
    pub fn value(&self, identity: &K) -> Option<V> {
        match self.slots.get(identity).as_deref() {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Last error, present only when `Failed`
    #[must_use]
    pub fn error(&self, identity: &K) -> Option<LoadError> {
        match self.slots.get(identity).as_deref() {
            Some(Slot::Failed(err)) => Some(err.clone()),
            _ => None,
        }
    }

    /// Subscribers attached to the in-flight load (0 when not loading)
    #[must_use]
    pub fn waiters(&self, identity: &K) -> usize {
        match self.slots.get(identity).as_deref() {
            Some(Slot::Loading { waiters, .. }) => *waiters,
            _ => 0,
        }
    }

    /// Forget a settled entry so the next request reloads
    ///
    /// In-flight loads are left alone.
    ///
    /// # Returns
    /// Whether an entry was removed
    pub fn invalidate(&self, identity: &K) -> bool {
        self.slots
            .remove_if(identity, |_, slot| !matches!(slot, Slot::Loading { .. }))
            .is_some()
    }

    /// Number of identities with any state
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no identity has been requested
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("entries", &self.slots.len())
            .finish()
    }
}
