//! Demonstration of reactive-using features.
//!
//! Run with: `cargo run -p reactive-using --bin demo`

use reactive_using::testing::{RecordingSubscriber, TestPublisher};
use reactive_using::{
    into_stream, source, BoxError, FusionMode, IterPublisher, Publisher, Using, UsingConfig,
};
use std::sync::{Arc, Mutex};

type Journal = Arc<Mutex<Vec<String>>>;

fn main() -> Result<(), BoxError> {
    println!("=== reactive-using Demo ===\n");

    demo_eager_and_lazy()?;
    demo_cancellation()?;
    demo_derivation_failure()?;
    demo_sync_fusion()?;
    demo_async_stream()?;

    println!("\n=== All demos completed successfully! ===");
    Ok(())
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn note(journal: &Journal, entry: impl Into<String>) {
    if let Ok(mut entries) = journal.lock() {
        entries.push(entry.into());
    }
}

fn print_journal(journal: &Journal) {
    if let Ok(entries) = journal.lock() {
        for entry in entries.iter() {
            println!("  {entry}");
        }
    }
}

/// A "connection" streaming three rows, closed through the journal.
fn connection(journal: &Journal) -> Using<String, u32> {
    let opened = Arc::clone(journal);
    let closed = Arc::clone(journal);
    Using::new(
        move || {
            note(&opened, "open:db");
            Ok("db".to_string())
        },
        |_conn: &String| Ok(Some(source(IterPublisher::new(vec![1, 2, 3])))),
        move |conn: String| {
            note(&closed, format!("close:{conn}"));
            Ok(())
        },
    )
}

/// Demo 1: Eager cleanup runs before completion, lazy after
fn demo_eager_and_lazy() -> Result<(), BoxError> {
    println!("--- Demo 1: Eager vs Lazy Cleanup ---");

    for config in [UsingConfig::eager(), UsingConfig::lazy()] {
        let log = journal();
        let terminal_log = Arc::clone(&log);
        let (downstream, recorder) = RecordingSubscriber::new()
            .on_terminal(move || note(&terminal_log, "complete"))
            .into_parts();

        connection(&log).with_config(config).subscribe(downstream);

        println!("  eager = {}, values = {:?}", config.eager, recorder.values());
        print_journal(&log);
    }

    println!("  ✓ Cleanup ordering complete\n");
    Ok(())
}

/// Demo 2: Cancellation releases the resource exactly once
fn demo_cancellation() -> Result<(), BoxError> {
    println!("--- Demo 2: Cancellation ---");

    let log = journal();
    let publisher = TestPublisher::<u32>::new();
    let upstream = publisher.clone();
    let closed = Arc::clone(&log);
    let using = Using::new(
        || Ok("socket".to_string()),
        move |_s: &String| Ok(Some(source(upstream.clone()))),
        move |s: String| {
            note(&closed, format!("close:{s}"));
            Ok(())
        },
    );

    let (downstream, recorder) = RecordingSubscriber::new().into_parts();
    using.subscribe(downstream);
    publisher.emit([10, 20]);
    recorder.cancel();
    recorder.cancel();

    println!("  Received {:?} before cancelling twice", recorder.values());
    print_journal(&log);
    println!("  ✓ Cancellation complete\n");
    Ok(())
}

/// Demo 3: Derivation failure still releases the resource
fn demo_derivation_failure() -> Result<(), BoxError> {
    println!("--- Demo 3: Derivation Failure ---");

    let log = journal();
    let closed = Arc::clone(&log);
    let using = Using::<String, u32>::new(
        || Ok("file".to_string()),
        |_f: &String| Err("bad".into()),
        move |f: String| {
            note(&closed, format!("close:{f}"));
            Ok(())
        },
    );

    let (downstream, recorder) = RecordingSubscriber::new().into_parts();
    using.subscribe(downstream);

    println!(
        "  Error: {:?} ({:?})",
        recorder.error_message(),
        recorder.error_kind()
    );
    print_journal(&log);
    println!("  ✓ Derivation failure complete\n");
    Ok(())
}

/// Demo 4: Synchronous fusion pulls values and releases on exhaustion
fn demo_sync_fusion() -> Result<(), BoxError> {
    println!("--- Demo 4: Sync Fusion ---");

    let log = journal();
    let (downstream, recorder) = RecordingSubscriber::new()
        .fusion(FusionMode::Any)
        .into_parts();
    connection(&log).subscribe(downstream);

    println!(
        "  Granted {:?}, pulled {:?}, drained = {}",
        recorder.granted_fusion(),
        recorder.values(),
        recorder.is_drained()
    );
    print_journal(&log);
    println!("  ✓ Sync fusion complete\n");
    Ok(())
}

/// Demo 5: Consuming a resource-scoped publisher as an async stream
fn demo_async_stream() -> Result<(), BoxError> {
    println!("--- Demo 5: Async Stream ---");

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let log = journal();
    let using = connection(&log);

    runtime.block_on(async {
        let mut stream = into_stream(&using, 2);
        while let Some(item) = std::future::poll_fn(|cx| {
            futures_core::Stream::poll_next(std::pin::Pin::new(&mut stream), cx)
        })
        .await
        {
            match item {
                Ok(value) => println!("  Streamed: {value}"),
                Err(e) => println!("  Stream failed: {e}"),
            }
        }
    });

    print_journal(&log);
    println!("  ✓ Async stream complete\n");
    Ok(())
}
