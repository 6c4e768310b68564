//! Asynchronous execution of child processes, with streamed I/O and fakes for testing.
//!
//! The crate launches one external process per [`Subprocess`], connects its standard
//! streams to pipes, and drives those pipes from Tokio tasks so that neither the caller nor
//! the child can deadlock on a full pipe buffer:
//!
//! * Output is delivered either as an [`OutputStream`] of byte chunks or to per-chunk
//!   callbacks ([`OutputHandlers`]). Streams that aren't captured go to the null device.
//! * Input is given as bytes, text in a chosen [`Encoding`], a file, or an asynchronous
//!   byte stream ([`Input`]). It is written by a background task and stdin is closed
//!   when it runs out.
//! * Completion ([`Completion`]) resolves only once the process has exited *and* every
//!   stream has been fully delivered. Dropping an unfinished completion terminates the
//!   process.
//!
//! [`Runner`] builds on this to run a command to completion and capture its output,
//! turning an unsuccessful exit into [`Error::NonZeroExit`].
//!
//! Process creation goes through an injectable [`ProcessFactory`]. The [`mock`] module
//! provides a factory serving scripted fake processes, so code that shells out can be
//! tested without touching the operating system.
//!
//! # Examples
//!
//! Capture the output of a command:
//!
//! ```no_run
//! # async fn demo() -> procpipe::Result<()> {
//! use procpipe::Command;
//!
//! let capture = procpipe::run(&Command::new("uname").arg("-a")).await?;
//! println!("{}", capture.stdout_str());
//! # Ok(())
//! # }
//! ```
//!
//! Feed input and stream output line by line:
//!
//! ```no_run
//! # async fn demo() -> procpipe::Result<()> {
//! use futures::StreamExt;
//! use procpipe::{Command, Input, OutputOptions, Started, Subprocess};
//!
//! let session = Subprocess::new(Command::new("sort"));
//! let Started { stdout, completion, .. } =
//!     session.start(Some(Input::text("b\na\n")), OutputOptions::STDOUT)?;
//! let lines: Vec<String> = stdout.lines().collect().await;
//! assert_eq!(lines, ["a", "b"]);
//! completion.await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations)]

mod command;
mod error;
mod factory;
mod input;
#[cfg(unix)]
mod posix;
mod process;
mod pump;
mod run;
mod session;
mod spawn;
mod stream;

pub mod mock;

pub use command::Command;
pub use error::{Error, Result};
pub use factory::{default_factory, ProcessFactory, SystemFactory};
pub use input::{ByteStream, Encoding, Input, InputFeed, InputOrigin};
pub use process::{
    ChildInput, ChildOutput, Launched, ProcessHandle, ProcessState, Redirection, StdioConfig,
    Termination, TerminationNotifier, TerminationReason,
};
pub use pump::ChunkHandler;
pub use run::{run, run_with_input, Capture, Runner};
pub use session::{Completion, OutputHandlers, OutputOptions, SessionPhase, Started, Subprocess};
pub use spawn::OsProcess;
pub use stream::{Lines, OutputStream};

#[cfg(test)]
mod tests;
