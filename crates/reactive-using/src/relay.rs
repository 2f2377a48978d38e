//! Relay subscribers placed between a derived publisher and the consumer.
//!
//! The adapter picks one of three relays per subscription:
//!
//! | [`RelayKind`]   | derived publisher | consumer    | subscription side         |
//! |-----------------|-------------------|-------------|---------------------------|
//! | `Fused`         | fuseable          | any         | delegates fusion upstream |
//! | `Conditional`   | not fuseable      | conditional | rejects fusion            |
//! | `Plain`         | not fuseable      | plain       | rejects fusion            |
//!
//! Every relay owns a [`ResourceGuard`] and is the only place the resource
//! is released.

use crate::cleanup::ResourceGuard;
use crate::error::FluxError;
use crate::protocol::{
    accept_subscription, Downstream, FusionMode, QueueSubscription, Subscriber, Subscription,
    SubscriptionHandle,
};
use std::sync::Arc;

/// Which relay variant serves a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayKind {
    /// The derived publisher supports fusion; fusion is passed through.
    Fused,
    /// The consumer accepts values conditionally; `try_on_next` is relayed.
    Conditional,
    Plain,
}

impl RelayKind {
    /// Chooses the relay for a derived publisher and a consumer.
    pub fn select<T>(source_is_fuseable: bool, downstream: &Downstream<T>) -> Self {
        if source_is_fuseable {
            Self::Fused
        } else if downstream.is_conditional() {
            Self::Conditional
        } else {
            Self::Plain
        }
    }
}

/// State behind the handle a relay gives the consumer.
///
/// Only the consumer owns the core. The relay subscriber keeps its own
/// clone of the guard, so a source that holds its subscriber never holds
/// the core that points back at the source.
pub(crate) struct RelayCore<R, T> {
    upstream: SubscriptionHandle<T>,
    guard: Arc<ResourceGuard<R>>,
}

impl<R, T> RelayCore<R, T> {
    pub(crate) fn new(upstream: SubscriptionHandle<T>, guard: Arc<ResourceGuard<R>>) -> Self {
        Self { upstream, guard }
    }

    #[inline]
    pub(crate) fn guard(&self) -> &ResourceGuard<R> {
        &self.guard
    }

    #[inline]
    pub(crate) fn upstream(&self) -> &SubscriptionHandle<T> {
        &self.upstream
    }

    pub(crate) fn request(&self, n: u64) {
        self.upstream.request(n);
    }

    /// Forwards cancellation, then races for the latch. A cleanup failure
    /// here has no signal channel left and goes to the error hook.
    pub(crate) fn cancel(&self) {
        self.upstream.cancel();
        self.guard.release_or_drop();
    }
}

/// Consumer-facing handle of the plain and conditional relays.
///
/// The derived publisher was found not to be fuseable, so fusion is always
/// refused and the pull surface is inert.
pub(crate) struct RelaySubscription<R, T> {
    core: RelayCore<R, T>,
}

impl<R, T> RelaySubscription<R, T> {
    pub(crate) fn new(upstream: SubscriptionHandle<T>, guard: Arc<ResourceGuard<R>>) -> Self {
        Self {
            core: RelayCore::new(upstream, guard),
        }
    }
}

impl<R: Send, T: Send> Subscription for RelaySubscription<R, T> {
    fn request(&self, n: u64) {
        self.core.request(n);
    }

    fn cancel(&self) {
        self.core.cancel();
    }
}

impl<R: Send, T: Send> QueueSubscription<T> for RelaySubscription<R, T> {
    fn request_fusion(&self, _requested: FusionMode) -> FusionMode {
        FusionMode::None
    }

    fn poll(&self) -> Result<Option<T>, FluxError> {
        Ok(None)
    }

    fn clear(&self) {}

    fn is_empty(&self) -> bool {
        self.core.guard().is_released()
    }

    fn size(&self) -> usize {
        0
    }
}

/// Relay for a non-fuseable publisher and a plain consumer.
pub(crate) struct UsingSubscriber<R, T> {
    actual: Box<dyn Subscriber<T>>,
    guard: Arc<ResourceGuard<R>>,
    subscribed: bool,
}

impl<R, T> UsingSubscriber<R, T> {
    pub(crate) fn new(actual: Box<dyn Subscriber<T>>, guard: ResourceGuard<R>) -> Self {
        Self {
            actual,
            guard: Arc::new(guard),
            subscribed: false,
        }
    }
}

impl<R, T> Subscriber<T> for UsingSubscriber<R, T>
where
    R: Send + 'static,
    T: Send + 'static,
{
    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>) {
        if accept_subscription(&mut self.subscribed, &subscription) {
            let handle: Arc<dyn QueueSubscription<T>> = Arc::new(RelaySubscription::new(
                subscription,
                Arc::clone(&self.guard),
            ));
            self.actual.on_subscribe(SubscriptionHandle::Queue(handle));
        }
    }

    fn on_next(&mut self, value: T) {
        self.actual.on_next(value);
    }

    fn on_error(&mut self, error: FluxError) {
        self.guard.relay_error(error, &mut *self.actual);
    }

    fn on_complete(&mut self) {
        self.guard.relay_complete(&mut *self.actual);
    }
}
