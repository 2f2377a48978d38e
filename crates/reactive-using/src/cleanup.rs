//! Resource ownership and the once-only cleanup protocol.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_resource_present;
use crate::error::{BoxError, FluxError};
use crate::hooks;
use crate::latch::TerminalLatch;
use crate::protocol::Subscriber;
use std::cell::UnsafeCell;
use std::sync::Arc;

/// User cleanup action; consumes the resource it releases.
pub type ResourceCleanup<R> = dyn Fn(R) -> Result<(), BoxError> + Send + Sync;

// =============================================================================
// RELEASE PROTOCOL
// =============================================================================
//
// Four paths may release the resource of one subscription:
//
// - `cancel()` from the consumer, on any thread
// - `on_error()` / `on_complete()` from the producer (serialized with each
//   other, but not with `cancel()`)
// - synchronous-fusion exhaustion observed in `poll()`
// - `Drop` of the guard, if none of the above ever happened
//
// All of them go through `latch.try_fire()`. The winner, and only the
// winner, takes the resource out of its cell and hands it to the cleanup
// action. Where a failed cleanup goes depends on whether a signal channel is
// still available:
//
// | path                 | cleanup failure                              |
// |----------------------|----------------------------------------------|
// | eager `on_error`     | suppressed companion of the upstream error   |
// | eager `on_complete`  | replaces completion with an error            |
// | lazy terminal        | dropped to `hooks::on_error_dropped`         |
// | `cancel` / `Drop`    | dropped to `hooks::on_error_dropped`         |
// | sync exhaustion      | returned from `poll()` to the puller         |
//
// =============================================================================

/// Owns one subscription's resource until the winning release path takes it.
pub(crate) struct ResourceGuard<R> {
    latch: TerminalLatch,
    /// Written once at construction; afterwards only the latch winner
    /// touches it.
    resource: UnsafeCell<Option<R>>,
    cleanup: Arc<ResourceCleanup<R>>,
    eager: bool,
}

// SAFETY: the cell is only accessed by the single latch winner (or by `Drop`,
// which has exclusive access), so sharing the guard never yields concurrent
// access to `R`. `R: Send` is required because the winner may be on any
// thread.
unsafe impl<R: Send> Sync for ResourceGuard<R> {}

impl<R> ResourceGuard<R> {
    pub(crate) fn new(resource: R, cleanup: Arc<ResourceCleanup<R>>, eager: bool) -> Self {
        Self {
            latch: TerminalLatch::new(),
            resource: UnsafeCell::new(Some(resource)),
            cleanup,
            eager,
        }
    }

    /// Returns `true` once any path has won the latch.
    #[inline]
    pub(crate) fn is_released(&self) -> bool {
        self.latch.is_fired()
    }

    /// Runs the cleanup action if this caller wins the latch.
    ///
    /// Returns `None` if another path already released the resource.
    pub(crate) fn release(&self) -> Option<Result<(), BoxError>> {
        if !self.latch.try_fire() {
            return None;
        }

        // SAFETY: `try_fire` returned true for exactly this caller, and no
        // other code path reads the cell after construction.
        let resource = unsafe { (*self.resource.get()).take() };

        #[cfg(debug_assertions)]
        debug_assert_resource_present!(resource.is_some());

        let resource = resource?;
        tracing::debug!(eager = self.eager, "running resource cleanup");
        Some((self.cleanup)(resource))
    }

    /// Releases the resource, dropping any cleanup failure to the error hook.
    pub(crate) fn release_or_drop(&self) {
        if let Some(Err(e)) = self.release() {
            hooks::on_error_dropped(FluxError::cleanup(e));
        }
    }

    /// Forwards an upstream error, releasing before or after per the eager
    /// flag.
    pub(crate) fn relay_error<T, S>(&self, mut error: FluxError, downstream: &mut S)
    where
        S: Subscriber<T> + ?Sized,
    {
        if self.eager {
            if let Some(Err(e)) = self.release() {
                error.add_suppressed(FluxError::cleanup(e));
            }
        }

        downstream.on_error(error);

        if !self.eager {
            self.release_or_drop();
        }
    }

    /// Forwards completion, releasing before or after per the eager flag.
    ///
    /// A failed eager cleanup replaces completion with an error.
    pub(crate) fn relay_complete<T, S>(&self, downstream: &mut S)
    where
        S: Subscriber<T> + ?Sized,
    {
        if self.eager {
            if let Some(Err(e)) = self.release() {
                downstream.on_error(FluxError::cleanup(e));
                return;
            }
        }

        downstream.on_complete();

        if !self.eager {
            self.release_or_drop();
        }
    }
}

impl<R> Drop for ResourceGuard<R> {
    fn drop(&mut self) {
        if !self.latch.try_fire() {
            return;
        }
        if let Some(resource) = self.resource.get_mut().take() {
            tracing::debug!("releasing resource of an abandoned subscription");
            if let Err(e) = (self.cleanup)(resource) {
                hooks::on_error_dropped(FluxError::cleanup(e));
            }
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::SubscriptionHandle;
    use crate::testing::capture_dropped_errors;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Terminals {
        completed: bool,
        errors: Vec<FluxError>,
    }

    impl Subscriber<u32> for Terminals {
        fn on_subscribe(&mut self, _subscription: SubscriptionHandle<u32>) {}

        fn on_next(&mut self, _value: u32) {}

        fn on_error(&mut self, error: FluxError) {
            self.errors.push(error);
        }

        fn on_complete(&mut self) {
            self.completed = true;
        }
    }

    fn guard(
        log: &Arc<Mutex<Vec<String>>>,
        fail_with: Option<&'static str>,
        eager: bool,
    ) -> ResourceGuard<&'static str> {
        let log = Arc::clone(log);
        let cleanup: Arc<ResourceCleanup<&'static str>> =
            Arc::new(move |r: &'static str| -> Result<(), BoxError> {
                log.lock().unwrap().push(format!("closed:{r}"));
                match fail_with {
                    Some(msg) => Err(msg.into()),
                    None => Ok(()),
                }
            });
        ResourceGuard::new("R", cleanup, eager)
    }

    #[test]
    fn test_release_runs_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let g = guard(&log, None, true);

        assert!(matches!(g.release(), Some(Ok(()))));
        assert!(g.release().is_none());
        assert!(g.is_released());
        drop(g);

        assert_eq!(*log.lock().unwrap(), vec!["closed:R"]);
    }

    #[test]
    fn test_eager_error_folds_cleanup_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let g = guard(&log, Some("close failed"), true);
        let mut t = Terminals::default();

        g.relay_error::<u32, _>(FluxError::upstream("boom"), &mut t);

        assert_eq!(t.errors.len(), 1);
        let err = &t.errors[0];
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.suppressed().len(), 1);
        assert_eq!(err.suppressed()[0].to_string(), "close failed");
    }

    #[test]
    fn test_eager_complete_replaced_by_cleanup_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let g = guard(&log, Some("close failed"), true);
        let mut t = Terminals::default();

        g.relay_complete::<u32, _>(&mut t);

        assert!(!t.completed);
        assert_eq!(t.errors.len(), 1);
        assert_eq!(t.errors[0].kind(), ErrorKind::Cleanup);
        assert_eq!(t.errors[0].to_string(), "close failed");
    }

    #[test]
    fn test_lazy_complete_drops_cleanup_failure() {
        let dropped = capture_dropped_errors();
        let log = Arc::new(Mutex::new(Vec::new()));
        let g = guard(&log, Some("cleanup-unit-lazy-complete"), false);
        let mut t = Terminals::default();

        g.relay_complete::<u32, _>(&mut t);

        assert!(t.completed);
        assert!(t.errors.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["closed:R"]);
        assert!(dropped.contains("cleanup-unit-lazy-complete"));
    }

    #[test]
    fn test_lazy_error_forwards_original() {
        let dropped = capture_dropped_errors();
        let log = Arc::new(Mutex::new(Vec::new()));
        let g = guard(&log, Some("cleanup-unit-lazy-error"), false);
        let mut t = Terminals::default();

        g.relay_error::<u32, _>(FluxError::upstream("boom"), &mut t);

        assert_eq!(t.errors.len(), 1);
        assert!(t.errors[0].suppressed().is_empty());
        assert!(dropped.contains("cleanup-unit-lazy-error"));
    }

    #[test]
    fn test_terminal_after_release_skips_cleanup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let g = guard(&log, None, true);
        let mut t = Terminals::default();

        g.release_or_drop();
        g.relay_complete::<u32, _>(&mut t);

        assert!(t.completed);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_releases_abandoned_resource() {
        let log = Arc::new(Mutex::new(Vec::new()));
        drop(guard(&log, None, false));
        assert_eq!(*log.lock().unwrap(), vec!["closed:R"]);
    }
}
