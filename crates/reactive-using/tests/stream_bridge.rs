//! Consuming resource-scoped publishers as async streams.

#![cfg(not(feature = "loom"))]

use futures::StreamExt;
use reactive_using::testing::TestPublisher;
use reactive_using::{into_stream, source, BoxError, IterPublisher, Using, UsingConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counted_using(releases: &Arc<AtomicUsize>, values: Vec<u64>) -> Using<String, u64> {
    let releases = Arc::clone(releases);
    Using::new(
        || Ok("conn".to_string()),
        move |_r: &String| Ok(Some(source(IterPublisher::new(values.clone())))),
        move |_r: String| -> Result<(), BoxError> {
            releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )
}

#[tokio::test]
async fn test_stream_releases_on_completion() {
    let releases = Arc::new(AtomicUsize::new(0));
    let using = counted_using(&releases, (0..100).collect());

    let values: Vec<u64> = into_stream(&using, 16)
        .map(|item| item.expect("no errors"))
        .collect()
        .await;

    assert_eq!(values, (0..100).collect::<Vec<_>>());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropping_stream_releases_resource() {
    let releases = Arc::new(AtomicUsize::new(0));
    let publisher = TestPublisher::<u64>::new();
    let upstream = publisher.clone();
    let counter = Arc::clone(&releases);
    let using = Using::new(
        || Ok(()),
        move |_r: &()| Ok(Some(source(upstream.clone()))),
        move |()| -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )
    .with_config(UsingConfig::lazy());

    let mut stream = into_stream(&using, 4);
    publisher.emit([1, 2]);
    assert_eq!(stream.next().await.unwrap().unwrap(), 1);

    drop(stream);
    assert!(publisher.is_cancelled());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_take_prefix_then_drop() {
    let releases = Arc::new(AtomicUsize::new(0));
    let using = counted_using(&releases, (0..1_000).collect());

    let firsts: Vec<u64> = into_stream(&using, 8)
        .take(3)
        .map(|item| item.expect("no errors"))
        .collect()
        .await;

    assert_eq!(firsts, vec![0, 1, 2]);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_values_pushed_from_another_task() {
    let publisher = TestPublisher::<u64>::new();
    let mut stream = into_stream(&publisher, 2);

    let producer = publisher.clone();
    let task = tokio::spawn(async move {
        for i in 0..5 {
            producer.next(i);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        producer.complete();
    });

    let mut received = Vec::new();
    while let Some(item) = stream.next().await {
        received.push(item.expect("no errors"));
    }
    task.await.unwrap();

    assert_eq!(received, vec![0, 1, 2, 3, 4]);
    assert!(stream.is_terminated());
}
