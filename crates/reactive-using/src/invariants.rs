//! Debug assertion macros for relay invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// Single release
// =============================================================================

/// Assert that the latch winner still finds the resource in place.
///
/// **Invariant**: `latch fired by caller → resource taken by caller`
///
/// Used in: `ResourceGuard::release()` after winning the latch
macro_rules! debug_assert_resource_present {
    ($present:expr) => {
        debug_assert!(
            $present,
            "resource already taken: cleanup would run more than once"
        )
    };
}

// =============================================================================
// Granted fusion mode
// =============================================================================

/// Assert that a granted fusion mode is compatible with the request.
///
/// **Invariant**: `granted ∈ {None} ∪ admissible(requested)`
///
/// Used in: `FusedSubscription::request_fusion()`
macro_rules! debug_assert_fusion_granted {
    ($requested:expr, $granted:expr) => {
        debug_assert!(
            $requested.admits($granted),
            "upstream granted fusion mode {:?} for request {:?}",
            $granted,
            $requested
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_fusion_granted;
pub(crate) use debug_assert_resource_present;
