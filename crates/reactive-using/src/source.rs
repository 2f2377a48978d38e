//! Reference publishers.

use crate::error::FluxError;
use crate::protocol::{
    error_immediately, Downstream, FusionMode, Publisher, QueueSubscription, Subscriber,
    Subscription, SubscriptionHandle,
};
use std::iter::Peekable;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::vec;

/// Replays a fixed list of values to every subscriber, then completes.
///
/// Honors demand, offers values through `try_on_next` to conditional
/// subscribers (rejections do not consume demand) and grants
/// [`FusionMode::Sync`].
#[derive(Debug, Clone)]
pub struct IterPublisher<T> {
    items: Vec<T>,
}

impl<T> IterPublisher<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }
}

impl<T> FromIterator<T> for IterPublisher<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T> Publisher<T> for IterPublisher<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe(&self, downstream: Downstream<T>) {
        let subscription = Arc::new(IterSubscription::new(self.items.clone()));

        // `wip` starts at 1, so requests made from inside `on_subscribe`
        // only register as missed work for the drain below.
        {
            let mut slot = subscription.lock_downstream();
            let downstream = slot.insert(downstream);
            let handle: Arc<dyn QueueSubscription<T>> = subscription.clone();
            downstream.on_subscribe(SubscriptionHandle::Queue(handle));
        }
        subscription.drain();
    }

    fn is_fuseable(&self) -> bool {
        true
    }
}

const UNBOUNDED: u64 = u64::MAX;

struct IterSubscription<T> {
    items: Mutex<Peekable<vec::IntoIter<T>>>,
    /// Taken on terminal signal or cancellation; only locked by the drain
    /// owner.
    downstream: Mutex<Option<Downstream<T>>>,
    requested: AtomicU64,
    wip: AtomicUsize,
    cancelled: AtomicBool,
    fused: AtomicBool,
}

impl<T> IterSubscription<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().peekable()),
            downstream: Mutex::new(None),
            requested: AtomicU64::new(0),
            wip: AtomicUsize::new(1),
            cancelled: AtomicBool::new(false),
            fused: AtomicBool::new(false),
        }
    }

    fn lock_downstream(&self) -> MutexGuard<'_, Option<Downstream<T>>> {
        self.downstream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_items(&self) -> MutexGuard<'_, Peekable<vec::IntoIter<T>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_item(&self) -> Option<T> {
        self.lock_items().next()
    }

    fn exhausted(&self) -> bool {
        self.lock_items().peek().is_none()
    }

    /// Emits as much as demand allows. Must only be entered by the caller
    /// that moved `wip` away from zero (or by `subscribe`, which starts it
    /// at one).
    fn drain(&self) {
        let mut missed = 1;
        loop {
            let mut slot = self.lock_downstream();

            if self.cancelled.load(Ordering::Acquire) || self.fused.load(Ordering::Acquire) {
                // Neither path pushes again; release the subscriber.
                slot.take();
                return;
            }
            let Some(downstream) = slot.as_mut() else {
                return;
            };

            let requested = self.requested.load(Ordering::Acquire);
            let mut emitted = 0u64;
            while emitted != requested {
                if self.cancelled.load(Ordering::Acquire) {
                    slot.take();
                    return;
                }
                let Some(value) = self.next_item() else {
                    break;
                };
                if downstream.try_on_next(value) {
                    emitted += 1;
                }
                if self.cancelled.load(Ordering::Acquire) {
                    slot.take();
                    return;
                }
            }

            if self.exhausted() {
                if let Some(mut downstream) = slot.take() {
                    drop(slot);
                    downstream.on_complete();
                }
                return;
            }

            if emitted != 0 && requested != UNBOUNDED {
                self.requested.fetch_sub(emitted, Ordering::AcqRel);
            }
            drop(slot);

            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }
}

impl<T: Send> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            return;
        }
        let _ = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                Some(r.saturating_add(n))
            });
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.drain();
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.lock_downstream().take();
        }
    }
}

impl<T: Send> QueueSubscription<T> for IterSubscription<T> {
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        if requested.admits(FusionMode::Sync) {
            self.fused.store(true, Ordering::Release);
            FusionMode::Sync
        } else {
            FusionMode::None
        }
    }

    fn poll(&self) -> Result<Option<T>, FluxError> {
        Ok(self.next_item())
    }

    fn clear(&self) {
        self.lock_items().by_ref().for_each(drop);
    }

    fn is_empty(&self) -> bool {
        self.exhausted()
    }

    fn size(&self) -> usize {
        self.lock_items().len()
    }
}

/// Fails every subscriber immediately with an upstream error.
#[derive(Debug, Clone)]
pub struct ErrorPublisher<T> {
    message: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ErrorPublisher<T> {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            _marker: PhantomData,
        }
    }
}

impl<T: Send + 'static> Publisher<T> for ErrorPublisher<T> {
    fn subscribe(&self, mut downstream: Downstream<T>) {
        error_immediately(&mut downstream, FluxError::upstream(self.message.clone()));
    }
}
