//! Configuration for resource-scoped publishers.

/// Configuration for [`Using`](crate::Using).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsingConfig {
    /// Whether cleanup runs before the terminal signal is forwarded.
    ///
    /// Eager cleanup lets a cleanup failure become the reported outcome
    /// (folded into an error, or replacing completion). Lazy cleanup runs
    /// after the terminal signal, so its failures can only be dropped to
    /// the error hook.
    ///
    /// Default: `true`
    pub eager: bool,
}

impl Default for UsingConfig {
    fn default() -> Self {
        Self { eager: true }
    }
}

impl UsingConfig {
    /// Cleanup before the terminal signal.
    pub const fn eager() -> Self {
        Self { eager: true }
    }

    /// Cleanup after the terminal signal.
    pub const fn lazy() -> Self {
        Self { eager: false }
    }

    /// Sets the eager flag.
    pub fn with_eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }
}
