//! Process-wide sink for errors that have no signal channel left.
//!
//! Cleanup failures after a terminal signal was already delivered, or after
//! the consumer cancelled, cannot reach the consumer without violating the
//! at-most-one-terminal-signal rule. They are reported here instead.

use crate::error::FluxError;
use std::sync::{Arc, PoisonError, RwLock};

type DroppedHook = Arc<dyn Fn(&FluxError) + Send + Sync>;

static ON_ERROR_DROPPED: RwLock<Option<DroppedHook>> = RwLock::new(None);

/// Replaces the process-wide dropped-error hook.
///
/// The hook may be invoked concurrently from any thread that cancels a
/// subscription or delivers a terminal signal.
pub fn set_on_error_dropped<F>(hook: F)
where
    F: Fn(&FluxError) + Send + Sync + 'static,
{
    let mut slot = ON_ERROR_DROPPED
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *slot = Some(Arc::new(hook));
}

/// Restores the default hook, which logs through `tracing`.
pub fn reset_on_error_dropped() {
    let mut slot = ON_ERROR_DROPPED
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *slot = None;
}

/// Reports an error that can no longer be delivered to a subscriber.
pub fn on_error_dropped(error: FluxError) {
    // Clone out so the hook runs without the lock held.
    let hook = ON_ERROR_DROPPED
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    match hook {
        Some(hook) => hook(&error),
        None => tracing::error!(
            kind = %error.kind(),
            suppressed = error.suppressed().len(),
            "dropped error: {}",
            error
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::capture_dropped_errors;

    #[test]
    fn test_installed_hook_receives_dropped_errors() {
        let dropped = capture_dropped_errors();
        on_error_dropped(FluxError::cleanup("hooks-unit-marker"));
        assert!(dropped.contains("hooks-unit-marker"));
    }
}
