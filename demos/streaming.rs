//! Stream subprocess output while the process runs.
//!
//! Run with: cargo run --example streaming

use bytes::Bytes;
use futures::StreamExt;
use procpipe::{Command, OutputHandlers, OutputOptions, Started, Subprocess};

#[tokio::main]
async fn main() -> procpipe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Lines as they are produced
    println!("Reading output line by line:");
    let session = Subprocess::new(Command::shell(
        "for i in 1 2 3; do echo \"line $i\"; sleep 0.2; done",
    ));
    let Started {
        stdout, completion, ..
    } = session.start(None, OutputOptions::STDOUT)?;
    let mut lines = stdout.lines().enumerate();
    while let Some((i, line)) = lines.next().await {
        println!("  {}: {line}", i + 1);
    }
    println!("  exited: {}", completion.await?);

    // Callbacks per chunk instead of a stream
    println!("\nCallbacks:");
    let session = Subprocess::new(Command::shell("echo out; echo 'error message' >&2"));
    let handlers = OutputHandlers::new()
        .stdout(|chunk: Bytes| print!("  stdout: {}", String::from_utf8_lossy(&chunk)))
        .stderr(|chunk: Bytes| print!("  stderr: {}", String::from_utf8_lossy(&chunk)));
    let status = session.launch(None, handlers)?.await?;
    println!("  exited: {status}");

    Ok(())
}
