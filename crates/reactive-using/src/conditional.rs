//! Relay for a non-fuseable publisher and a conditional consumer.

use crate::cleanup::ResourceGuard;
use crate::error::FluxError;
use crate::protocol::{
    accept_subscription, ConditionalSubscriber, QueueSubscription, Subscriber, SubscriptionHandle,
};
use crate::relay::RelaySubscription;
use std::sync::Arc;

/// Same protocol as the plain relay, but keeps `try_on_next` available to
/// the derived publisher so filtering downstream stays demand-neutral.
pub(crate) struct UsingConditionalSubscriber<R, T> {
    actual: Box<dyn ConditionalSubscriber<T>>,
    guard: Arc<ResourceGuard<R>>,
    subscribed: bool,
}

impl<R, T> UsingConditionalSubscriber<R, T> {
    pub(crate) fn new(actual: Box<dyn ConditionalSubscriber<T>>, guard: ResourceGuard<R>) -> Self {
        Self {
            actual,
            guard: Arc::new(guard),
            subscribed: false,
        }
    }
}

impl<R, T> Subscriber<T> for UsingConditionalSubscriber<R, T>
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

impl<R, T> ConditionalSubscriber<T> for UsingConditionalSubscriber<R, T>
where
    R: Send + 'static,
    T: Send + 'static,
{
    fn try_on_next(&mut self, value: T) -> bool {
        self.actual.try_on_next(value)
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::cleanup::ResourceCleanup;
    use crate::protocol::{Downstream, Publisher};
    use crate::source::IterPublisher;
    use crate::testing::RecordingSubscriber;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_rejected_values_do_not_consume_demand() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let cleanup: Arc<ResourceCleanup<()>> = Arc::new(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (downstream, recorder) = RecordingSubscriber::new()
            .request(2)
            .filter(|v: &u32| v % 2 == 0)
            .into_parts();
        let Downstream::Conditional(actual) = downstream else {
            unreachable!("filtered recording subscriber is conditional");
        };

        IterPublisher::new(vec![1, 2, 3, 4, 5, 6]).subscribe(Downstream::conditional(
            UsingConditionalSubscriber::new(actual, ResourceGuard::new((), cleanup, true)),
        ));

        // Two accepted values exhaust the demand of two; odd values were
        // offered and rejected along the way.
        assert_eq!(recorder.values(), vec![2, 4]);
        assert_eq!(recorder.rejected(), vec![1, 3]);
        assert!(!recorder.is_completed());

        recorder.request(1);
        assert_eq!(recorder.values(), vec![2, 4, 6]);
        assert_eq!(recorder.rejected(), vec![1, 3, 5]);
        assert!(recorder.is_completed());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
