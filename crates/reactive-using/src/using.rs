//! The resource-scoped publisher.

use crate::cleanup::{ResourceCleanup, ResourceGuard};
use crate::conditional::UsingConditionalSubscriber;
use crate::config::UsingConfig;
use crate::error::{BoxError, ErrorKind, FluxError};
use crate::fused::UsingFuseableSubscriber;
use crate::protocol::{error_immediately, Downstream, Publisher, Source};
use crate::relay::{RelayKind, UsingSubscriber};
use std::sync::Arc;

/// Acquires a fresh resource per subscriber.
pub type ResourceSupplier<R> = dyn Fn() -> Result<R, BoxError> + Send + Sync;

/// Derives the publisher to stream from an acquired resource.
///
/// `Ok(None)` means the factory produced no publisher; it is reported as an
/// [`ErrorKind::InvalidSource`](crate::ErrorKind::InvalidSource) failure.
pub type SourceFactory<R, T> = dyn Fn(&R) -> Result<Option<Source<T>>, BoxError> + Send + Sync;

/// Streams values from a publisher derived from a per-subscriber resource,
/// releasing that resource exactly once when the sequence completes, fails
/// or is cancelled.
///
/// # Example
///
/// ```
/// use reactive_using::testing::RecordingSubscriber;
/// use reactive_using::{source, IterPublisher, Publisher, Using};
/// use std::sync::{Arc, Mutex};
///
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let cleanup_log = Arc::clone(&log);
///
/// let using = Using::new(
///     || Ok("R".to_string()),
///     |_r: &String| Ok(Some(source(IterPublisher::new(vec![1, 2, 3])))),
///     move |r: String| {
///         cleanup_log.lock().unwrap().push(format!("closed:{r}"));
///         Ok(())
///     },
/// );
///
/// let (downstream, recorder) = RecordingSubscriber::new().into_parts();
/// using.subscribe(downstream);
///
/// assert_eq!(recorder.values(), vec![1, 2, 3]);
/// assert!(recorder.is_completed());
/// assert_eq!(*log.lock().unwrap(), vec!["closed:R"]);
/// ```
pub struct Using<R, T> {
    resource_supplier: Box<ResourceSupplier<R>>,
    source_factory: Box<SourceFactory<R, T>>,
    resource_cleanup: Arc<ResourceCleanup<R>>,
    config: UsingConfig,
}

impl<R, T> Using<R, T>
where
    R: Send + 'static,
    T: Send + 'static,
{
    /// Creates an adapter with eager cleanup.
    pub fn new<S, F, C>(resource_supplier: S, source_factory: F, resource_cleanup: C) -> Self
    where
        S: Fn() -> Result<R, BoxError> + Send + Sync + 'static,
        F: Fn(&R) -> Result<Option<Source<T>>, BoxError> + Send + Sync + 'static,
        C: Fn(R) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            resource_supplier: Box::new(resource_supplier),
            source_factory: Box::new(source_factory),
            resource_cleanup: Arc::new(resource_cleanup),
            config: UsingConfig::default(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: UsingConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &UsingConfig {
        &self.config
    }

    /// Runs the cleanup for a resource whose derivation failed, folding a
    /// cleanup failure into `error`.
    fn abort_derivation(&self, resource: R, error: FluxError) -> FluxError {
        match (self.resource_cleanup)(resource) {
            Ok(()) => error,
            Err(cleanup_err) => {
                let cleanup_err = FluxError::cleanup(cleanup_err);
                // A missing publisher is the lesser failure: the cleanup
                // error leads and the invalid-source error is suppressed.
                if error.kind() == ErrorKind::InvalidSource {
                    cleanup_err.with_suppressed(error)
                } else {
                    error.with_suppressed(cleanup_err)
                }
            }
        }
    }
}

impl<R, T> Publisher<T> for Using<R, T>
where
    R: Send + 'static,
    T: Send + 'static,
{
    fn subscribe(&self, mut downstream: Downstream<T>) {
        let resource = match (self.resource_supplier)() {
            Ok(resource) => resource,
            Err(e) => {
                tracing::debug!("resource acquisition failed: {}", e);
                error_immediately(&mut downstream, FluxError::acquisition(e));
                return;
            }
        };

        let source = match (self.source_factory)(&resource) {
            Ok(Some(source)) => source,
            Ok(None) => {
                let error = self.abort_derivation(resource, FluxError::invalid_source());
                error_immediately(&mut downstream, error);
                return;
            }
            Err(e) => {
                let error = self.abort_derivation(resource, FluxError::derivation(e));
                error_immediately(&mut downstream, error);
                return;
            }
        };

        let guard = ResourceGuard::new(
            resource,
            Arc::clone(&self.resource_cleanup),
            self.config.eager,
        );
        let kind = RelayKind::select(source.is_fuseable(), &downstream);
        tracing::debug!(
            relay = ?kind,
            eager = self.config.eager,
            "subscribing relay to derived source"
        );

        match (kind, downstream) {
            (RelayKind::Fused, downstream) => {
                let relay = UsingFuseableSubscriber::new(downstream, guard);
                source.subscribe(Downstream::plain(relay));
            }
            (_, Downstream::Conditional(actual)) => {
                let relay = UsingConditionalSubscriber::new(actual, guard);
                source.subscribe(Downstream::conditional(relay));
            }
            (_, Downstream::Plain(actual)) => {
                let relay = UsingSubscriber::new(actual, guard);
                source.subscribe(Downstream::plain(relay));
            }
        }
    }

    /// Every relay presents a pull surface, so a `Using` nested inside
    /// another is always treated as fuseable.
    fn is_fuseable(&self) -> bool {
        true
    }
}
