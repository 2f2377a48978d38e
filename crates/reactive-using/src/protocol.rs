//! Backpressure-aware publisher/subscriber protocol.
//!
//! A [`Publisher`] hands each [`Subscriber`] exactly one
//! [`SubscriptionHandle`] via `on_subscribe`, followed by zero or more
//! `on_next` calls and at most one of `on_error` / `on_complete`. Those
//! signals are serialized by the producer, so subscribers take `&mut self`.
//! `request` and `cancel` on the handle may be called from any thread at any
//! time, so subscriptions take `&self`.
//!
//! Two optional capabilities are expressed as tagged choices rather than
//! downcasts:
//!
//! - **Conditional acceptance**: a [`Downstream::Conditional`] subscriber
//!   can reject a value via [`ConditionalSubscriber::try_on_next`] without
//!   consuming demand.
//! - **Fusion**: a [`SubscriptionHandle::Queue`] can be pulled directly with
//!   [`QueueSubscription::poll`] once a non-`None` [`FusionMode`] is granted.

use crate::error::FluxError;
use crate::hooks;
use std::sync::Arc;

/// Demand/cancel control for one subscription.
pub trait Subscription: Send + Sync {
    /// Requests up to `n` more values. `u64::MAX` means unbounded.
    fn request(&self, n: u64);

    /// Stops the flow of values. Idempotent.
    fn cancel(&self);
}

/// Fast-pull negotiation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FusionMode {
    /// No fusion; values are pushed through `on_next`.
    #[default]
    None,
    /// Values are pulled on the caller's thread. Exhaustion is signalled by
    /// `poll` returning `Ok(None)`; no `on_complete` is ever delivered.
    Sync,
    /// Values are pulled after an `on_next` wake-up; terminals are pushed.
    Async,
    /// Either `Sync` or `Async`. Only valid as a request, never granted.
    Any,
}

impl FusionMode {
    /// Returns `true` if a request for `self` admits granting `granted`.
    pub fn admits(self, granted: FusionMode) -> bool {
        match (self, granted) {
            (_, FusionMode::None) => true,
            (FusionMode::Any, FusionMode::Sync | FusionMode::Async) => true,
            (requested, granted) => requested == granted,
        }
    }
}

/// A subscription that can also be pulled from directly.
pub trait QueueSubscription<T>: Subscription {
    /// Negotiates a fusion mode; returns the granted mode.
    fn request_fusion(&self, requested: FusionMode) -> FusionMode;

    /// Pulls the next value. `Ok(None)` means nothing is available right now
    /// (or, in `Sync` mode, that the source is exhausted).
    fn poll(&self) -> Result<Option<T>, FluxError>;

    /// Discards any values still queued.
    fn clear(&self);

    fn is_empty(&self) -> bool;

    fn size(&self) -> usize;
}

/// The handle a subscriber receives in `on_subscribe`.
pub enum SubscriptionHandle<T> {
    Plain(Arc<dyn Subscription>),
    Queue(Arc<dyn QueueSubscription<T>>),
}

impl<T> SubscriptionHandle<T> {
    #[inline]
    pub fn request(&self, n: u64) {
        match self {
            Self::Plain(s) => s.request(n),
            Self::Queue(s) => s.request(n),
        }
    }

    #[inline]
    pub fn cancel(&self) {
        match self {
            Self::Plain(s) => s.cancel(),
            Self::Queue(s) => s.cancel(),
        }
    }

    /// Returns the fast-pull surface, if this handle offers one.
    pub fn as_queue(&self) -> Option<&Arc<dyn QueueSubscription<T>>> {
        match self {
            Self::Plain(_) => None,
            Self::Queue(q) => Some(q),
        }
    }
}

impl<T> Clone for SubscriptionHandle<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(s) => Self::Plain(Arc::clone(s)),
            Self::Queue(s) => Self::Queue(Arc::clone(s)),
        }
    }
}

/// Receiver of the signals of one subscription.
pub trait Subscriber<T>: Send {
    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>);

    fn on_next(&mut self, value: T);

    fn on_error(&mut self, error: FluxError);

    fn on_complete(&mut self);
}

/// A subscriber that can reject values without consuming demand.
pub trait ConditionalSubscriber<T>: Subscriber<T> {
    /// Offers `value`; returns `true` if it was accepted (and demand consumed).
    fn try_on_next(&mut self, value: T) -> bool;
}

/// A subscriber together with the capability it opted into.
pub enum Downstream<T> {
    Plain(Box<dyn Subscriber<T>>),
    Conditional(Box<dyn ConditionalSubscriber<T>>),
}

impl<T> Downstream<T> {
    pub fn plain(subscriber: impl Subscriber<T> + 'static) -> Self {
        Self::Plain(Box::new(subscriber))
    }

    pub fn conditional(subscriber: impl ConditionalSubscriber<T> + 'static) -> Self {
        Self::Conditional(Box::new(subscriber))
    }

    #[inline]
    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::Conditional(_))
    }

    /// Offers a value with conditional semantics. Plain subscribers always
    /// accept.
    pub fn try_on_next(&mut self, value: T) -> bool {
        match self {
            Self::Plain(s) => {
                s.on_next(value);
                true
            }
            Self::Conditional(s) => s.try_on_next(value),
        }
    }
}

impl<T> Subscriber<T> for Downstream<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>) {
        match self {
            Self::Plain(s) => s.on_subscribe(subscription),
            Self::Conditional(s) => s.on_subscribe(subscription),
        }
    }

    fn on_next(&mut self, value: T) {
        match self {
            Self::Plain(s) => s.on_next(value),
            Self::Conditional(s) => s.on_next(value),
        }
    }

    fn on_error(&mut self, error: FluxError) {
        match self {
            Self::Plain(s) => s.on_error(error),
            Self::Conditional(s) => s.on_error(error),
        }
    }

    fn on_complete(&mut self) {
        match self {
            Self::Plain(s) => s.on_complete(),
            Self::Conditional(s) => s.on_complete(),
        }
    }
}

/// A source of values for any number of subscribers.
pub trait Publisher<T>: Send + Sync {
    fn subscribe(&self, downstream: Downstream<T>);

    /// Returns `true` if subscriptions handed out by this publisher support
    /// fusion negotiation.
    fn is_fuseable(&self) -> bool {
        false
    }
}

/// Shared, type-erased publisher.
pub type Source<T> = Arc<dyn Publisher<T>>;

/// Erases a concrete publisher into a [`Source`].
pub fn source<T, P>(publisher: P) -> Source<T>
where
    P: Publisher<T> + 'static,
{
    Arc::new(publisher)
}

/// A subscription that never produces anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}

impl<T> QueueSubscription<T> for EmptySubscription {
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

/// Terminates `subscriber` with `error` before any real subscription exists.
pub fn error_immediately<T: 'static>(subscriber: &mut impl Subscriber<T>, error: FluxError) {
    subscriber.on_subscribe(SubscriptionHandle::Queue(Arc::new(EmptySubscription)));
    subscriber.on_error(error);
}

/// Accepts the first upstream handle and flips `subscribed`.
///
/// A second handle is cancelled and reported as a protocol error; returns
/// `false` in that case.
pub(crate) fn accept_subscription<T>(
    subscribed: &mut bool,
    subscription: &SubscriptionHandle<T>,
) -> bool {
    if !*subscribed {
        *subscribed = true;
        return true;
    }
    tracing::warn!("rejecting duplicate on_subscribe");
    subscription.cancel();
    hooks::on_error_dropped(FluxError::duplicate_subscription());
    false
}
