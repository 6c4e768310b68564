//! Give up on a slow process without leaving it running.
//!
//! Run with: cargo run --example cancellation

use std::time::Duration;

use procpipe::{Command, Error, OutputOptions, Runner, Started, Subprocess};

#[tokio::main]
async fn main() -> procpipe::Result<()> {
    // Cancel through a signal future
    let result = Runner::new()
        .capture_or_cancel(
            &Command::from_argv(["sleep", "10"]),
            None,
            tokio::time::sleep(Duration::from_millis(500)),
        )
        .await;
    match result {
        Err(Error::Cancelled) => println!("sleep cancelled after 500ms"),
        other => println!("Unexpected: {other:?}"),
    }

    // Dropping the completion (here, on timeout) terminates the child as well
    let session = Subprocess::new(Command::from_argv(["sleep", "10"]));
    let Started { completion, .. } = session.start(None, OutputOptions::NONE)?;
    println!("Started pid {:?}", session.pid());
    if tokio::time::timeout(Duration::from_millis(500), completion)
        .await
        .is_err()
    {
        println!("Timed out");
    }
    while session.is_running() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!(
        "Process ended: code {} ({})",
        session.exit_code(),
        session.termination_reason()
    );

    Ok(())
}
