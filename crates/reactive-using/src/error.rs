//! Error types for resource-scoped publishers.

use std::fmt;
use thiserror::Error;

/// Boxed error returned by user-supplied suppliers, factories and cleanups.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Where in the lifecycle a [`FluxError`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The resource supplier failed; no resource exists.
    Acquisition,
    /// The source factory failed after the resource was acquired.
    Derivation,
    /// The source factory returned no publisher.
    InvalidSource,
    /// The cleanup action failed.
    Cleanup,
    /// The derived publisher terminated with an error.
    Upstream,
    /// A peer violated the subscription protocol.
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Acquisition => "acquisition",
            Self::Derivation => "derivation",
            Self::InvalidSource => "invalid source",
            Self::Cleanup => "cleanup",
            Self::Upstream => "upstream",
            Self::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

/// The source factory produced no publisher for an acquired resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the source factory returned no publisher")]
pub struct InvalidSourceError;

/// `on_subscribe` was delivered more than once to the same subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("on_subscribe called more than once")]
pub struct DuplicateSubscriptionError;

/// A terminal failure travelling through the signal protocol.
///
/// Carries a primary cause plus any number of suppressed companions, the
/// latter collected at the points where a cleanup failure has to be folded
/// into a failure that is already being reported.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct FluxError {
    kind: ErrorKind,
    source: BoxError,
    suppressed: Vec<FluxError>,
}

impl FluxError {
    /// Creates an error of the given kind with no suppressed causes.
    pub fn new(kind: ErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
            suppressed: Vec::new(),
        }
    }

    pub fn acquisition(source: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Acquisition, source)
    }

    pub fn derivation(source: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Derivation, source)
    }

    pub fn cleanup(source: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Cleanup, source)
    }

    /// An error emitted by a publisher, e.g. `FluxError::upstream("boom")`.
    pub fn upstream(source: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Upstream, source)
    }

    pub fn invalid_source() -> Self {
        Self::new(ErrorKind::InvalidSource, InvalidSourceError)
    }

    pub fn duplicate_subscription() -> Self {
        Self::new(ErrorKind::Protocol, DuplicateSubscriptionError)
    }

    /// Returns the lifecycle stage this error originated in.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the errors suppressed in favour of this one, oldest first.
    #[inline]
    pub fn suppressed(&self) -> &[FluxError] {
        &self.suppressed
    }

    /// Attaches `other` as a suppressed companion of this error.
    pub fn add_suppressed(&mut self, other: FluxError) {
        self.suppressed.push(other);
    }

    /// By-value form of [`add_suppressed`](Self::add_suppressed).
    pub fn with_suppressed(mut self, other: FluxError) -> Self {
        self.add_suppressed(other);
        self
    }

    /// Returns the boxed primary cause.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.source
    }

    /// Consumes the error, returning the primary cause.
    pub fn into_cause(self) -> BoxError {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_primary_message() {
        let err = FluxError::derivation("bad").with_suppressed(FluxError::cleanup("close failed"));
        assert_eq!(err.to_string(), "bad");
        assert_eq!(err.kind(), ErrorKind::Derivation);
        assert_eq!(err.suppressed().len(), 1);
        assert_eq!(err.suppressed()[0].to_string(), "close failed");
        assert_eq!(err.suppressed()[0].kind(), ErrorKind::Cleanup);
    }

    #[test]
    fn test_source_chain_exposes_cause() {
        use std::error::Error as _;

        let err = FluxError::invalid_source();
        let source = err.source().expect("primary cause is the source");
        assert!(source.is::<InvalidSourceError>());
        assert_eq!(err.to_string(), "the source factory returned no publisher");
    }

    #[test]
    fn test_suppressed_preserves_order() {
        let mut err = FluxError::upstream("boom");
        err.add_suppressed(FluxError::cleanup("first"));
        err.add_suppressed(FluxError::cleanup("second"));

        let messages: Vec<String> = err.suppressed().iter().map(ToString::to_string).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::InvalidSource.to_string(), "invalid source");
        assert_eq!(FluxError::duplicate_subscription().kind(), ErrorKind::Protocol);
    }
}
