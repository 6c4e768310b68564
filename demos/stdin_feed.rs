//! Feed a subprocess's standard input from different sources.
//!
//! Run with: cargo run --example stdin_feed

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use procpipe::{Command, Encoding, Input, Runner};

#[tokio::main]
async fn main() -> procpipe::Result<()> {
    let runner = Runner::new();
    let sort = Command::new("sort");

    let sorted = runner.string(&sort, Some(Input::text("pear\napple\nfig\n"))).await?;
    print!("Sorted text:\n{sorted}");

    let count = runner
        .string(&Command::from_argv(["wc", "-c"]), Some(Input::bytes(vec![0u8; 4096])))
        .await?;
    println!("Byte count: {}", count.trim());

    let hex = runner
        .string(
            &Command::from_argv(["od", "-An", "-tx1"]),
            Some(Input::text_with_encoding("hi", Encoding::Utf16Be)),
        )
        .await?;
    println!("UTF-16BE bytes: {}", hex.trim());

    let path = std::env::temp_dir().join("procpipe-stdin-demo.txt");
    std::fs::write(&path, "from a file\n")?;
    let echoed = runner.string(&Command::new("cat"), Some(Input::file(&path))).await?;
    print!("File: {echoed}");
    std::fs::remove_file(&path)?;

    // chunks produced over time are written as they arrive
    let ticks = futures::stream::iter(1..=3).then(|i| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, io::Error>(Bytes::from(format!("tick {i}\n")))
    });
    let echoed = runner.string(&Command::new("cat"), Some(Input::stream(ticks))).await?;
    print!("Stream:\n{echoed}");

    Ok(())
}
