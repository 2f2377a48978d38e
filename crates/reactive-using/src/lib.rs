//! Reactive-Using - Resource-Scoped Publisher Adapter
//!
//! [`Using`] acquires a resource for each subscriber, derives a publisher
//! from it, relays that publisher's signals, and releases the resource
//! exactly once: on completion, on error, or on cancellation, whichever
//! happens first.
//!
//! # Key Features
//!
//! - Single release guarded by a lock-free terminal latch
//! - Eager (release before the terminal signal) or lazy cleanup
//! - Conditional delivery (`try_on_next`) preserved through the relay
//! - Fusion negotiation passed through to fuseable publishers
//! - Async bridge to `futures::Stream` via [`into_stream`]
//!
//! # Example
//!
//! ```
//! use reactive_using::testing::RecordingSubscriber;
//! use reactive_using::{source, IterPublisher, Publisher, Using, UsingConfig};
//!
//! let using = Using::new(
//!     || Ok(String::from("connection")),
//!     |conn: &String| Ok(Some(source(IterPublisher::new(vec![conn.len()])))),
//!     |conn: String| {
//!         println!("closing {conn}");
//!         Ok(())
//!     },
//! )
//! .with_config(UsingConfig::lazy());
//!
//! let (downstream, recorder) = RecordingSubscriber::new().into_parts();
//! using.subscribe(downstream);
//!
//! assert_eq!(recorder.values(), vec![10]);
//! assert!(recorder.is_completed());
//! ```

mod cleanup;
mod conditional;
mod config;
mod error;
mod fused;
pub mod hooks;
mod invariants;
mod latch;
mod protocol;
mod relay;
mod source;
mod stream;
pub mod testing;
mod using;

pub use cleanup::ResourceCleanup;
pub use config::UsingConfig;
pub use error::{BoxError, DuplicateSubscriptionError, ErrorKind, FluxError, InvalidSourceError};
pub use latch::TerminalLatch;
pub use protocol::{
    error_immediately, source, ConditionalSubscriber, Downstream, EmptySubscription, FusionMode,
    Publisher, QueueSubscription, Source, Subscriber, Subscription, SubscriptionHandle,
};
pub use relay::RelayKind;
pub use source::{ErrorPublisher, IterPublisher};
pub use stream::{into_stream, PublisherStream};
pub use using::{ResourceSupplier, SourceFactory, Using};
