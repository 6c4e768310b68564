use std::fmt;
use std::future::{self, Future};
use std::sync::Arc;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::factory::{default_factory, ProcessFactory};
use crate::input::Input;
use crate::process::{Termination, TerminationReason};
use crate::pump::Accumulator;
use crate::session::{OutputHandlers, OutputOptions, Subprocess};

/// Data captured from a finished process.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Capture {
    /// Standard output content.
    pub stdout: Vec<u8>,
    /// Standard error content.
    pub stderr: Vec<u8>,
    /// How the process ended.
    pub termination: Termination,
}

impl Capture {
    /// Standard output as string, converted from bytes using
    /// `String::from_utf8_lossy`.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error as string, converted from bytes using
    /// `String::from_utf8_lossy`.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Standard output followed by standard error.
    ///
    /// The two streams are captured independently, so this does not reflect the order in
    /// which the child actually wrote them.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        out.extend_from_slice(&self.stdout);
        out.extend_from_slice(&self.stderr);
        out
    }

    pub fn exit_code(&self) -> i32 {
        self.termination.code
    }

    pub fn termination_reason(&self) -> TerminationReason {
        self.termination.reason
    }

    /// True if the exit status of the process is 0.
    pub fn success(&self) -> bool {
        self.termination.success()
    }

    /// Returns `self` if the exit status is successful, or an error otherwise.
    pub fn check(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::NonZeroExit {
                status: self.termination.code,
                reason: self.termination.reason,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs commands to completion and collects their output in memory.
///
/// Both output streams are drained concurrently while the process runs. By default a
/// process that doesn't exit successfully turns into [`Error::NonZeroExit`] carrying
/// what it printed; [`unchecked`](Self::unchecked) returns the output regardless.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() -> procpipe::Result<()> {
/// use procpipe::{Command, Runner};
///
/// let listing = Runner::new().string(&Command::new("ls"), None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
#[must_use]
pub struct Runner {
    factory: Arc<dyn ProcessFactory>,
    options: OutputOptions,
    checked: bool,
}

impl Runner {
    /// A checked runner that captures stdout, using the [`default_factory`].
    pub fn new() -> Runner {
        Runner::with_factory(default_factory())
    }

    pub fn with_factory(factory: Arc<dyn ProcessFactory>) -> Runner {
        Runner {
            factory,
            options: OutputOptions::STDOUT,
            checked: true,
        }
    }

    /// Selects the streams returned by [`data`](Self::data) and [`string`](Self::string)
    /// and captured by [`capture`](Self::capture).
    ///
    /// A checked runner captures stderr regardless, for the error report.
    pub fn output_options(mut self, options: OutputOptions) -> Runner {
        self.options = options;
        self
    }

    /// Don't turn an unsuccessful exit into an error.
    pub fn unchecked(mut self) -> Runner {
        self.checked = false;
        self
    }

    /// Runs `command` and returns everything it printed along with its exit status.
    pub async fn capture(&self, command: &Command, input: Option<Input>) -> Result<Capture> {
        self.run(command, input, future::pending()).await
    }

    /// Like [`capture`](Self::capture), but gives up when `signal` resolves first,
    /// terminating the process and failing with [`Error::Cancelled`].
    pub async fn capture_or_cancel(
        &self,
        command: &Command,
        input: Option<Input>,
        signal: impl Future<Output = ()>,
    ) -> Result<Capture> {
        self.run(command, input, signal).await
    }

    /// Runs `command` and returns the selected output. With both streams selected this is
    /// stdout followed by stderr.
    pub async fn data(&self, command: &Command, input: Option<Input>) -> Result<Vec<u8>> {
        let capture = self.capture(command, input).await?;
        let stdout = self.options.contains(OutputOptions::STDOUT);
        let stderr = self.options.contains(OutputOptions::STDERR);
        Ok(match (stdout, stderr) {
            (true, true) => capture.combined(),
            (true, false) => capture.stdout,
            (false, true) => capture.stderr,
            (false, false) => Vec::new(),
        })
    }

    /// Like [`data`](Self::data), with invalid UTF-8 replaced.
    pub async fn string(&self, command: &Command, input: Option<Input>) -> Result<String> {
        let data = self.data(command, input).await?;
        Ok(match String::from_utf8(data) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    async fn run(
        &self,
        command: &Command,
        input: Option<Input>,
        signal: impl Future<Output = ()>,
    ) -> Result<Capture> {
        let stdout = Accumulator::default();
        let stderr = Accumulator::default();
        let mut handlers = OutputHandlers::new();
        if self.options.contains(OutputOptions::STDOUT) {
            handlers = handlers.stdout(stdout.handler());
        }
        if self.options.contains(OutputOptions::STDERR) || self.checked {
            handlers = handlers.stderr(stderr.handler());
        }

        let session = Subprocess::with_factory(command.clone(), Arc::clone(&self.factory));
        let completion = session.launch(input, handlers)?;
        let termination = completion.wait_or_cancel(signal).await?;

        // The pumps holding the handlers have been joined; nothing writes any more.
        let capture = Capture {
            stdout: stdout.take(),
            stderr: stderr.take(),
            termination,
        };
        if self.checked {
            capture.check()
        } else {
            Ok(capture)
        }
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("options", &self.options)
            .field("checked", &self.checked)
            .finish_non_exhaustive()
    }
}

impl Default for Runner {
    fn default() -> Runner {
        Runner::new()
    }
}

/// Runs `command` with an empty stdin and captures its stdout and stderr.
///
/// Fails with [`Error::NonZeroExit`] if the process doesn't exit successfully.
pub async fn run(command: &Command) -> Result<Capture> {
    run_with_input(command, None).await
}

/// Runs `command` feeding it `input` and captures its stdout and stderr.
pub async fn run_with_input(command: &Command, input: Option<Input>) -> Result<Capture> {
    Runner::new()
        .output_options(OutputOptions::COMBINED)
        .capture(command, input)
        .await
}
