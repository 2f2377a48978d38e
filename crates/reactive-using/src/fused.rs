//! Relay for a fuseable derived publisher.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_fusion_granted;
use crate::cleanup::ResourceGuard;
use crate::error::FluxError;
use crate::protocol::{
    accept_subscription, Downstream, FusionMode, QueueSubscription, Subscriber, Subscription,
    SubscriptionHandle,
};
use crate::relay::RelayCore;
use crossbeam_utils::atomic::AtomicCell;
use std::sync::Arc;

/// Consumer-facing handle that passes fusion through to the derived
/// publisher's queue subscription.
pub(crate) struct FusedSubscription<R, T> {
    core: RelayCore<R, T>,
    /// Mode granted by upstream; written during negotiation, read by `poll`.
    mode: AtomicCell<FusionMode>,
}

impl<R, T> FusedSubscription<R, T> {
    pub(crate) fn new(upstream: SubscriptionHandle<T>, guard: Arc<ResourceGuard<R>>) -> Self {
        Self {
            core: RelayCore::new(upstream, guard),
            mode: AtomicCell::new(FusionMode::None),
        }
    }

    /// Returns the negotiated mode.
    #[inline]
    pub(crate) fn mode(&self) -> FusionMode {
        self.mode.load()
    }

    fn queue(&self) -> Option<&Arc<dyn QueueSubscription<T>>> {
        self.core.upstream().as_queue()
    }
}

impl<R: Send, T: Send> Subscription for FusedSubscription<R, T> {
    fn request(&self, n: u64) {
        self.core.request(n);
    }

    fn cancel(&self) {
        self.core.cancel();
    }
}

impl<R: Send, T: Send> QueueSubscription<T> for FusedSubscription<R, T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        // A publisher that declared itself fuseable but handed out a plain
        // subscription cannot be pulled from.
        let Some(queue) = self.queue() else {
            return FusionMode::None;
        };
        let granted = queue.request_fusion(requested);

        #[cfg(debug_assertions)]
        debug_assert_fusion_granted!(requested, granted);

        self.mode.store(granted);
        granted
    }

    fn poll(&self) -> Result<Option<T>, FluxError> {
        let Some(queue) = self.queue() else {
            return Ok(None);
        };
        let value = queue.poll()?;

        if value.is_none() && self.mode() == FusionMode::Sync {
            // Sync mode never delivers on_complete, so exhaustion is itself a
            // release path. Unlike every other path, a cleanup failure here
            // is neither folded into a signal nor dropped to the hook: it is
            // returned to whoever pulled, who terminates with it.
            if let Some(Err(e)) = self.core.guard().release() {
                return Err(FluxError::cleanup(e));
            }
        }
        Ok(value)
    }

    fn clear(&self) {
        if let Some(queue) = self.queue() {
            queue.clear();
        }
    }

    fn is_empty(&self) -> bool {
        self.queue().map_or(true, |queue| queue.is_empty())
    }

    fn size(&self) -> usize {
        self.queue().map_or(0, |queue| queue.size())
    }
}

/// Relay used whenever the derived publisher is fuseable, whatever the
/// consumer's capabilities.
pub(crate) struct UsingFuseableSubscriber<R, T> {
    actual: Downstream<T>,
    guard: Arc<ResourceGuard<R>>,
    subscribed: bool,
}

impl<R, T> UsingFuseableSubscriber<R, T> {
    pub(crate) fn new(actual: Downstream<T>, guard: ResourceGuard<R>) -> Self {
        Self {
            actual,
            guard: Arc::new(guard),
            subscribed: false,
        }
    }
}

impl<R, T> Subscriber<T> for UsingFuseableSubscriber<R, T>
where
    R: Send + 'static,
    T: Send + 'static,
{
    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>) {
        if accept_subscription(&mut self.subscribed, &subscription) {
            let handle: Arc<dyn QueueSubscription<T>> = Arc::new(FusedSubscription::new(
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
        self.guard.relay_error(error, &mut self.actual);
    }

    fn on_complete(&mut self) {
        self.guard.relay_complete(&mut self.actual);
    }
}
