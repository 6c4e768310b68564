//! Run a command to completion and capture its output.
//!
//! Run with: cargo run --example capture_output

use procpipe::{Command, Error, OutputOptions, Runner};

#[tokio::main]
async fn main() -> procpipe::Result<()> {
    // stdout and stderr, with a non-zero exit turned into an error
    let capture = procpipe::run(&Command::new("ls").arg("-la")).await?;
    println!("ls printed {} bytes:", capture.stdout.len());
    print!("{}", capture.stdout_str());

    // just the text
    let kernel = Runner::new().string(&Command::new("uname").arg("-sr"), None).await?;
    println!("Kernel: {}", kernel.trim());

    // both streams merged, stdout first
    let merged = Runner::new()
        .output_options(OutputOptions::COMBINED)
        .string(&Command::shell("echo to-stdout; echo to-stderr >&2"), None)
        .await?;
    print!("Combined:\n{merged}");

    // failures carry the exit status and what was printed
    match procpipe::run(&Command::shell("echo 'no such thing' >&2; exit 3")).await {
        Err(Error::NonZeroExit { status, stderr, .. }) => {
            println!(
                "Failed with status {status}: {}",
                String::from_utf8_lossy(&stderr).trim()
            );
        }
        other => println!("Unexpected: {other:?}"),
    }

    // or opt out and look at the status yourself
    let capture = Runner::new()
        .unchecked()
        .capture(&Command::shell("exit 7"), None)
        .await?;
    println!("Unchecked run exited with {}", capture.termination);

    Ok(())
}
