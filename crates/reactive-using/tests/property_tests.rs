//! Property-based tests for the release protocol.
//!
//! Arbitrary interleavings of upstream signals, demand and cancellation must
//! never release a resource twice, never deliver more than one terminal
//! signal, and never lose a release once every handle is gone.

#![cfg(not(feature = "loom"))]

use proptest::prelude::*;
use reactive_using::testing::{RecordingSubscriber, TestPublisher};
use reactive_using::{
    source, BoxError, FluxError, FusionMode, IterPublisher, Publisher, Using, UsingConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Next(u32),
    Request(u64),
    Cancel,
    Complete,
    Error,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u32>().prop_map(Op::Next),
        2 => (1u64..8).prop_map(Op::Request),
        1 => Just(Op::Cancel),
        1 => Just(Op::Complete),
        1 => Just(Op::Error),
    ]
}

fn counting_cleanup(
    releases: &Arc<AtomicUsize>,
    fail: bool,
) -> impl Fn(()) -> Result<(), BoxError> + Send + Sync + 'static {
    let releases = Arc::clone(releases);
    move |()| {
        releases.fetch_add(1, Ordering::SeqCst);
        if fail {
            Err("cleanup failed".into())
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Single release
// "every subscription that acquired a resource releases it exactly once"
// =============================================================================

proptest! {
    /// Scripted upstream: at most one release while live, exactly one after
    /// everything is dropped.
    #[test]
    fn prop_single_release_under_script(
        ops in prop::collection::vec(op(), 0..40),
        eager in any::<bool>(),
        fail in any::<bool>(),
    ) {
        let releases = Arc::new(AtomicUsize::new(0));
        let publisher = TestPublisher::<u32>::new();
        let upstream = publisher.clone();
        let using = Using::new(
            || Ok(()),
            move |_r: &()| Ok(Some(source(upstream.clone()))),
            counting_cleanup(&releases, fail),
        )
        .with_config(UsingConfig::default().with_eager(eager));

        let (downstream, recorder) = RecordingSubscriber::new().request(0).into_parts();
        using.subscribe(downstream);

        let mut cancelled = false;
        let mut sent = Vec::new();
        for op in ops {
            match op {
                Op::Next(v) => {
                    if !cancelled && publisher.has_subscriber() {
                        sent.push(v);
                    }
                    publisher.next(v);
                }
                Op::Request(n) => recorder.request(n),
                Op::Cancel => {
                    cancelled = true;
                    recorder.cancel();
                }
                Op::Complete => publisher.complete(),
                Op::Error => publisher.error(FluxError::upstream("upstream failed")),
            }
            prop_assert!(releases.load(Ordering::SeqCst) <= 1);
            prop_assert!(recorder.terminal_count() <= 1);
        }

        prop_assert_eq!(recorder.values(), sent);

        drop(using);
        drop(publisher);
        drop(recorder);
        prop_assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}

// =============================================================================
// Demand
// "values are relayed in order and never beyond what was requested"
// =============================================================================

proptest! {
    #[test]
    fn prop_relays_prefix_within_demand(
        len in 0u32..30,
        batches in prop::collection::vec(0u64..6, 0..10),
        eager in any::<bool>(),
    ) {
        let releases = Arc::new(AtomicUsize::new(0));
        let items: Vec<u32> = (0..len).collect();
        let source_items = items.clone();
        let using = Using::new(
            || Ok(()),
            move |_r: &()| Ok(Some(source(IterPublisher::new(source_items.clone())))),
            counting_cleanup(&releases, false),
        )
        .with_config(UsingConfig::default().with_eager(eager));

        let (downstream, recorder) = RecordingSubscriber::new().request(0).into_parts();
        using.subscribe(downstream);

        let mut demand = 0u64;
        for n in batches {
            recorder.request(n);
            demand += n;
        }

        let values = recorder.values();
        let expected = usize::try_from(demand).unwrap().min(items.len());
        prop_assert_eq!(&values[..], &items[..expected]);

        let done = values.len() == items.len();
        prop_assert_eq!(recorder.is_completed(), done);
        prop_assert_eq!(releases.load(Ordering::SeqCst), usize::from(done));
    }

    /// Synchronous fusion drains everything and releases once, whatever the
    /// length.
    #[test]
    fn prop_sync_fusion_releases_once(len in 0u32..50) {
        let releases = Arc::new(AtomicUsize::new(0));
        let using = Using::new(
            || Ok(()),
            move |_r: &()| Ok(Some(source(IterPublisher::new((0..len).collect::<Vec<_>>())))),
            counting_cleanup(&releases, false),
        );

        let (downstream, recorder) = RecordingSubscriber::new()
            .fusion(FusionMode::Sync)
            .into_parts();
        using.subscribe(downstream);

        prop_assert_eq!(recorder.values().len(), len as usize);
        prop_assert!(recorder.is_drained());
        prop_assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
