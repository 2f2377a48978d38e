//! Async bridge: consume any publisher as a `futures::Stream`.

use crate::error::FluxError;
use crate::protocol::{Downstream, Publisher, Subscriber, SubscriptionHandle};
use futures_core::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;

enum Signal<T> {
    Next(T),
    Error(FluxError),
    Complete,
}

/// Subscribes to `publisher` and returns its signals as a stream.
///
/// `prefetch` items are requested up front and the same amount again each
/// time that many have been consumed; `0` requests unbounded demand.
/// Dropping the stream before it terminates cancels the subscription.
pub fn into_stream<T, P>(publisher: &P, prefetch: usize) -> PublisherStream<T>
where
    T: Send + 'static,
    P: Publisher<T> + ?Sized,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = Arc::new(OnceLock::new());
    let batch = if prefetch == 0 {
        u64::MAX
    } else {
        u64::try_from(prefetch).unwrap_or(u64::MAX)
    };

    publisher.subscribe(Downstream::plain(BridgeSubscriber {
        tx,
        handle: Some(Arc::clone(&handle)),
        batch,
    }));

    PublisherStream {
        rx,
        upstream: Upstream {
            handle,
            batch,
            consumed: 0,
            terminated: false,
        },
    }
}

struct BridgeSubscriber<T> {
    tx: mpsc::UnboundedSender<Signal<T>>,
    /// Handed to the stream side on subscribe, then dropped so the
    /// upstream never holds a path back to its own subscription.
    handle: Option<Arc<OnceLock<SubscriptionHandle<T>>>>,
    batch: u64,
}

impl<T: Send + 'static> Subscriber<T> for BridgeSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionHandle<T>) {
        let Some(slot) = self.handle.take() else {
            tracing::warn!("rejecting duplicate on_subscribe");
            subscription.cancel();
            return;
        };
        let _ = slot.set(subscription.clone());
        drop(slot);
        subscription.request(self.batch);
    }

    fn on_next(&mut self, value: T) {
        // A closed channel means the stream was dropped and has cancelled.
        let _ = self.tx.send(Signal::Next(value));
    }

    fn on_error(&mut self, error: FluxError) {
        let _ = self.tx.send(Signal::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.tx.send(Signal::Complete);
    }
}

struct Upstream<T> {
    handle: Arc<OnceLock<SubscriptionHandle<T>>>,
    batch: u64,
    consumed: u64,
    terminated: bool,
}

impl<T> Upstream<T> {
    fn replenish(&mut self) {
        if self.batch == u64::MAX {
            return;
        }
        self.consumed += 1;
        if self.consumed == self.batch {
            self.consumed = 0;
            if let Some(handle) = self.handle.get() {
                handle.request(self.batch);
            }
        }
    }
}

impl<T> Drop for Upstream<T> {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        if let Some(handle) = self.handle.get() {
            tracing::trace!("publisher stream dropped before termination, cancelling");
            handle.cancel();
        }
    }
}

pin_project! {
    /// Stream of the values a publisher emits.
    ///
    /// Yields `Ok(value)` per `on_next`, a final `Err` on `on_error`, and ends
    /// on `on_complete` (or when the publisher drops its subscriber without
    /// a terminal signal).
    pub struct PublisherStream<T> {
        rx: mpsc::UnboundedReceiver<Signal<T>>,
        upstream: Upstream<T>,
    }
}

impl<T> PublisherStream<T> {
    /// Returns `true` once a terminal signal has been yielded.
    pub fn is_terminated(&self) -> bool {
        self.upstream.terminated
    }

    /// Cancels the subscription; the stream ends after any values already
    /// delivered.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.upstream.handle.get() {
            handle.cancel();
        }
        self.upstream.terminated = true;
    }
}

impl<T> Stream for PublisherStream<T> {
    type Item = Result<T, FluxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match ready!(this.rx.poll_recv(cx)) {
            Some(Signal::Next(value)) => {
                this.upstream.replenish();
                Poll::Ready(Some(Ok(value)))
            }
            Some(Signal::Error(error)) => {
                this.upstream.terminated = true;
                this.rx.close();
                Poll::Ready(Some(Err(error)))
            }
            Some(Signal::Complete) | None => {
                this.upstream.terminated = true;
                this.rx.close();
                Poll::Ready(None)
            }
        }
    }
}
