//! Test doubles for driving and observing publishers.
//!
//! [`TestPublisher`] lets a test push signals by hand (from any thread) and
//! observe the demand and cancellation it receives. [`RecordingSubscriber`]
//! records everything it is sent and exposes it through a cloneable
//! [`Recorder`].

use crate::error::{ErrorKind, FluxError};
use crate::hooks;
use crate::protocol::{
    ConditionalSubscriber, Downstream, FusionMode, Publisher, QueueSubscription, Subscriber,
    Subscription, SubscriptionHandle,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// TestPublisher
// =============================================================================

/// A publisher driven manually by the test.
///
/// Serves a single subscriber. Once that subscriber cancels, further
/// signals are swallowed, as a well-behaved publisher would.
pub struct TestPublisher<T> {
    inner: Arc<TestInner<T>>,
}

struct TestInner<T> {
    downstream: Mutex<Option<Downstream<T>>>,
    subscription: Arc<TestSubscription>,
    fuseable: bool,
}

#[derive(Debug, Default)]
struct TestSubscription {
    requested: AtomicU64,
    cancelled: AtomicBool,
    cancels: AtomicUsize,
}

impl Subscription for TestSubscription {
    fn request(&self, n: u64) {
        let _ = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                Some(r.saturating_add(n))
            });
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::AcqRel);
        self.cancelled.store(true, Ordering::Release);
    }
}

impl<T> QueueSubscription<T> for TestSubscription {
    fn request_fusion(&self, _requested: FusionMode) -> FusionMode {
        FusionMode::None
    }

    fn poll(&self) -> Result<Option<T>, FluxError> {
        Ok(None)
    }

    fn clear(&self) {}

    fn is_empty(&self) -> bool {
        true
    }

    fn size(&self) -> usize {
        0
    }
}

impl<T: Send + 'static> TestPublisher<T> {
    /// A publisher handing out a plain subscription.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A publisher that declares itself fuseable. Its queue subscription
    /// refuses every fusion mode, so signals are still pushed.
    pub fn fuseable() -> Self {
        Self::build(true)
    }

    fn build(fuseable: bool) -> Self {
        Self {
            inner: Arc::new(TestInner {
                downstream: Mutex::new(None),
                subscription: Arc::new(TestSubscription::default()),
                fuseable,
            }),
        }
    }

    /// Pushes `value` unless the subscriber cancelled.
    pub fn next(&self, value: T) {
        let mut slot = lock(&self.inner.downstream);
        if self.is_cancelled() {
            return;
        }
        if let Some(downstream) = slot.as_mut() {
            downstream.on_next(value);
        }
    }

    /// Pushes every value in order.
    pub fn emit(&self, values: impl IntoIterator<Item = T>) {
        for value in values {
            self.next(value);
        }
    }

    /// Completes the subscriber and releases it.
    pub fn complete(&self) {
        let taken = lock(&self.inner.downstream).take();
        if let Some(mut downstream) = taken {
            if !self.is_cancelled() {
                downstream.on_complete();
            }
        }
    }

    /// Fails the subscriber and releases it.
    pub fn error(&self, error: FluxError) {
        let taken = lock(&self.inner.downstream).take();
        if let Some(mut downstream) = taken {
            if !self.is_cancelled() {
                downstream.on_error(error);
            }
        }
    }

    /// Total demand requested so far (saturating).
    pub fn requested(&self) -> u64 {
        self.inner.subscription.requested.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.subscription.cancelled.load(Ordering::Acquire)
    }

    /// Number of `cancel` calls received, including repeats.
    pub fn cancel_count(&self) -> usize {
        self.inner.subscription.cancels.load(Ordering::Acquire)
    }

    pub fn has_subscriber(&self) -> bool {
        lock(&self.inner.downstream).is_some()
    }
}

impl<T: Send + 'static> Default for TestPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TestPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for TestPublisher<T> {
    fn subscribe(&self, mut downstream: Downstream<T>) {
        let subscription = Arc::clone(&self.inner.subscription);
        let handle = if self.inner.fuseable {
            SubscriptionHandle::Queue(subscription as Arc<dyn QueueSubscription<T>>)
        } else {
            SubscriptionHandle::Plain(subscription as Arc<dyn Subscription>)
        };
        downstream.on_subscribe(handle);
        *lock(&self.inner.downstream) = Some(downstream);
    }

    fn is_fuseable(&self) -> bool {
        self.inner.fuseable
    }
}

// =============================================================================
// RecordingSubscriber
// =============================================================================

struct Record<T> {
    subscription: Option<SubscriptionHandle<T>>,
    subscriptions: usize,
    values: Vec<T>,
    rejected: Vec<T>,
    completions: usize,
    errors: Vec<FluxError>,
    drained: bool,
    granted: Option<FusionMode>,
}

impl<T> Default for Record<T> {
    fn default() -> Self {
        Self {
            subscription: None,
            subscriptions: 0,
            values: Vec::new(),
            rejected: Vec::new(),
            completions: 0,
            errors: Vec::new(),
            drained: false,
            granted: None,
        }
    }
}

/// A subscriber that records every signal.
///
/// Configured builder-style, then split with
/// [`into_parts`](Self::into_parts) into the [`Downstream`] to subscribe and
/// a [`Recorder`] to inspect.
pub struct RecordingSubscriber<T> {
    record: Arc<Mutex<Record<T>>>,
    initial_request: u64,
    fusion: Option<FusionMode>,
    filter: Option<Box<dyn Fn(&T) -> bool + Send>>,
    cancel_after: Option<usize>,
    on_terminal: Option<Box<dyn FnMut() + Send>>,
    defer_drain: bool,
}

impl<T: Send + 'static> RecordingSubscriber<T> {
    /// Requests unbounded demand on subscribe.
    pub fn new() -> Self {
        Self {
            record: Arc::new(Mutex::new(Record::default())),
            initial_request: u64::MAX,
            fusion: None,
            filter: None,
            cancel_after: None,
            on_terminal: None,
            defer_drain: false,
        }
    }

    /// Demand requested from `on_subscribe`; `0` requests nothing.
    pub fn request(mut self, n: u64) -> Self {
        self.initial_request = n;
        self
    }

    /// Negotiates `mode` on subscribe. If `Sync` is granted, the subscriber
    /// drains by polling instead of requesting.
    pub fn fusion(mut self, mode: FusionMode) -> Self {
        self.fusion = Some(mode);
        self
    }

    /// Makes the subscriber conditional: values failing `filter` are
    /// rejected through `try_on_next`.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Cancels the subscription once `n` values have been received.
    pub fn cancel_after(mut self, n: usize) -> Self {
        self.cancel_after = Some(n);
        self
    }

    /// Leaves a granted `Sync` fusion undrained; pull later with
    /// [`Recorder::drain`], from any thread.
    pub fn defer_drain(mut self) -> Self {
        self.defer_drain = true;
        self
    }

    /// Runs `hook` just before a terminal signal (or synchronous
    /// exhaustion) is recorded.
    pub fn on_terminal<F>(mut self, hook: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_terminal = Some(Box::new(hook));
        self
    }

    /// Splits into the subscriber side and the inspection side.
    pub fn into_parts(self) -> (Downstream<T>, Recorder<T>) {
        let recorder = Recorder {
            owner: Arc::new(RecordOwner {
                record: Arc::clone(&self.record),
            }),
        };
        let downstream = if self.filter.is_some() {
            Downstream::conditional(self)
        } else {
            Downstream::plain(self)
        };
        (downstream, recorder)
    }

    fn run_terminal_hook(&mut self) {
        if let Some(hook) = self.on_terminal.as_mut() {
            hook();
        }
    }

    /// Records `value`; returns `true` if the cancel threshold was reached.
    fn record_value(&mut self, value: T) -> bool {
        let received = {
            let mut record = lock(&self.record);
            record.values.push(value);
            record.values.len()
        };
        self.cancel_after == Some(received)
    }

    fn cancel_upstream(&self) {
        let handle = lock(&self.record).subscription.clone();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    fn drain_sync(&mut self, queue: &Arc<dyn QueueSubscription<T>>) {
        loop {
            match queue.poll() {
                Ok(Some(value)) => {
                    if self.record_value(value) {
                        queue.cancel();
                        return;
                    }
                }
                Ok(None) => {
                    self.run_terminal_hook();
                    lock(&self.record).drained = true;
                    return;
                }
                Err(e) => {
                    queue.cancel();
                    self.run_terminal_hook();
                    lock(&self.record).errors.push(e);
                    return;
                }
            }
        }
    }
}

impl<T: Send + 'static> Default for RecordingSubscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Subscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>) {
        {
            let mut record = lock(&self.record);
            record.subscription = Some(subscription.clone());
            record.subscriptions += 1;
        }

        if let Some(mode) = self.fusion {
            let granted = subscription
                .as_queue()
                .map_or(FusionMode::None, |q| q.request_fusion(mode));
            lock(&self.record).granted = Some(granted);

            if granted == FusionMode::Sync {
                if !self.defer_drain {
                    if let Some(queue) = subscription.as_queue() {
                        self.drain_sync(queue);
                    }
                }
                return;
            }
        }

        if self.initial_request > 0 {
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&mut self, value: T) {
        if self.record_value(value) {
            self.cancel_upstream();
        }
    }

    fn on_error(&mut self, error: FluxError) {
        self.run_terminal_hook();
        lock(&self.record).errors.push(error);
    }

    fn on_complete(&mut self) {
        self.run_terminal_hook();
        lock(&self.record).completions += 1;
    }
}

impl<T: Send + 'static> ConditionalSubscriber<T> for RecordingSubscriber<T> {
    fn try_on_next(&mut self, value: T) -> bool {
        let accepted = self.filter.as_ref().map_or(true, |f| f(&value));
        if accepted {
            self.on_next(value);
        } else {
            lock(&self.record).rejected.push(value);
        }
        accepted
    }
}

/// Inspection side of a [`RecordingSubscriber`].
///
/// Dropping the last clone cancels a subscription that has not terminated,
/// the way dropping a [`PublisherStream`](crate::PublisherStream) does. The
/// subscriber side is usually owned by its publisher, so nothing else would
/// ever let go of it.
pub struct Recorder<T> {
    owner: Arc<RecordOwner<T>>,
}

struct RecordOwner<T> {
    record: Arc<Mutex<Record<T>>>,
}

impl<T> Drop for RecordOwner<T> {
    fn drop(&mut self) {
        let handle = {
            let record = lock(&self.record);
            let terminated = record.completions > 0 || !record.errors.is_empty() || record.drained;
            if terminated {
                None
            } else {
                record.subscription.clone()
            }
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            owner: Arc::clone(&self.owner),
        }
    }
}

impl<T> Recorder<T> {
    fn record(&self) -> MutexGuard<'_, Record<T>> {
        lock(&self.owner.record)
    }

    /// The handle received in `on_subscribe`, if any.
    pub fn subscription(&self) -> Option<SubscriptionHandle<T>> {
        self.record().subscription.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.record().subscriptions
    }

    pub fn request(&self, n: u64) {
        if let Some(handle) = self.subscription() {
            handle.request(n);
        }
    }

    pub fn cancel(&self) {
        if let Some(handle) = self.subscription() {
            handle.cancel();
        }
    }

    /// Polls a `Sync`-fused subscription left undrained by
    /// [`RecordingSubscriber::defer_drain`] until it runs out or fails.
    pub fn drain(&self) {
        let Some(handle) = self.subscription() else {
            return;
        };
        let Some(queue) = handle.as_queue() else {
            return;
        };
        loop {
            match queue.poll() {
                Ok(Some(value)) => self.record().values.push(value),
                Ok(None) => {
                    self.record().drained = true;
                    return;
                }
                Err(e) => {
                    queue.cancel();
                    self.record().errors.push(e);
                    return;
                }
            }
        }
    }

    pub fn value_count(&self) -> usize {
        self.record().values.len()
    }

    pub fn is_completed(&self) -> bool {
        self.record().completions > 0
    }

    /// Synchronous fusion ran out of values.
    pub fn is_drained(&self) -> bool {
        self.record().drained
    }

    /// Number of terminal outcomes observed (completions, errors and
    /// synchronous exhaustion).
    pub fn terminal_count(&self) -> usize {
        let record = self.record();
        record.completions + record.errors.len() + usize::from(record.drained)
    }

    pub fn error_count(&self) -> usize {
        self.record().errors.len()
    }

    /// Message of the first error received.
    pub fn error_message(&self) -> Option<String> {
        self.record().errors.first().map(ToString::to_string)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.record().errors.first().map(FluxError::kind)
    }

    /// Messages of the errors suppressed by the first error received.
    pub fn suppressed_messages(&self) -> Vec<String> {
        self.record()
            .errors
            .first()
            .map(|e| e.suppressed().iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    /// The fusion mode granted on subscribe, if fusion was requested.
    pub fn granted_fusion(&self) -> Option<FusionMode> {
        self.record().granted
    }
}

impl<T: Clone> Recorder<T> {
    pub fn values(&self) -> Vec<T> {
        self.record().values.clone()
    }

    /// Values rejected through `try_on_next`.
    pub fn rejected(&self) -> Vec<T> {
        self.record().rejected.clone()
    }
}

// =============================================================================
// Dropped errors
// =============================================================================

static DROPPED: Mutex<Vec<String>> = Mutex::new(Vec::new());
static INSTALL: Once = Once::new();

/// Installs (once per process) a dropped-error hook that captures messages.
///
/// Tests run in parallel and share the hook, so assertions should look for
/// messages unique to the test. Do not combine with
/// [`hooks::set_on_error_dropped`] in the same test binary.
pub fn capture_dropped_errors() -> DroppedErrors {
    INSTALL.call_once(|| {
        hooks::set_on_error_dropped(|e| lock(&DROPPED).push(e.to_string()));
    });
    DroppedErrors { _private: () }
}

/// View of the messages captured by [`capture_dropped_errors`].
#[derive(Debug, Clone, Copy)]
pub struct DroppedErrors {
    _private: (),
}

impl DroppedErrors {
    pub fn messages(&self) -> Vec<String> {
        lock(&DROPPED).clone()
    }

    /// Number of captured errors with exactly this message.
    pub fn count(&self, message: &str) -> usize {
        lock(&DROPPED).iter().filter(|m| *m == message).count()
    }

    pub fn contains(&self, message: &str) -> bool {
        self.count(message) > 0
    }
}
