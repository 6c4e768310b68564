//! Test code that runs commands without running them.
//!
//! Run with: cargo run --example mocking

use std::sync::Arc;

use procpipe::mock::MockFactory;
use procpipe::{Command, Input, ProcessFactory, Runner};

async fn disk_usage(factory: Arc<dyn ProcessFactory>, dir: &str) -> procpipe::Result<u64> {
    let out = Runner::with_factory(factory)
        .string(&Command::from_argv(["du", "-sk", dir]), None)
        .await?;
    let kb = out
        .split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    Ok(kb)
}

#[tokio::main]
async fn main() {
    let mocks = MockFactory::new();
    mocks.stub_output(["du", "-sk", "/srv"], "2048\t/srv\n", "", 0);
    mocks.expect(["tr", "a-z", "A-Z"], Some(Input::text("hello")), |process| async move {
        let input = process.read_stdin().await;
        process.write_stdout(input.to_ascii_uppercase()).await;
        process.exit(0);
    });
    let factory: Arc<dyn ProcessFactory> = Arc::new(mocks.clone());

    match disk_usage(Arc::clone(&factory), "/srv").await {
        Ok(kb) => println!("/srv uses {kb} KiB"),
        Err(e) => println!("du failed: {e}"),
    }

    let shout = Runner::with_factory(Arc::clone(&factory))
        .string(
            &Command::from_argv(["tr", "a-z", "A-Z"]),
            Some(Input::text("hello")),
        )
        .await;
    println!("tr said {shout:?}");

    // no stub for this one
    if let Err(e) = disk_usage(factory, "/home").await {
        println!("Unmocked command: {e}");
    }

    match mocks.verify() {
        Ok(()) => println!("All expectations met"),
        Err(e) => println!("Verification failed: {e}"),
    }
}
