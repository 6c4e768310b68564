use std::fmt;
use std::future::{Future, IntoFuture};
use std::io;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::factory::{default_factory, ProcessFactory};
use crate::input::{Input, InputFeed};
use crate::process::{
    ChildOutput, ProcessHandle, ProcessState, Redirection, StdioConfig, Termination,
    TerminationReason,
};
use crate::pump::{self, ChunkHandler, OutputSink};
use crate::stream::OutputStream;

/// Selects which output streams are captured.
///
/// A stream that is not captured is connected to the null device, so a child writing
/// any amount to it never blocks.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct OutputOptions(u8);

impl OutputOptions {
    pub const NONE: OutputOptions = OutputOptions(0);
    pub const STDOUT: OutputOptions = OutputOptions(1);
    pub const STDERR: OutputOptions = OutputOptions(2);
    /// Both streams. Where they are merged into one buffer, stdout comes first.
    pub const COMBINED: OutputOptions = OutputOptions(1 | 2);

    pub fn contains(self, other: OutputOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for OutputOptions {
    fn default() -> OutputOptions {
        OutputOptions::STDOUT
    }
}

impl BitOr for OutputOptions {
    type Output = OutputOptions;

    fn bitor(self, rhs: OutputOptions) -> OutputOptions {
        OutputOptions(self.0 | rhs.0)
    }
}

impl BitOrAssign for OutputOptions {
    fn bitor_assign(&mut self, rhs: OutputOptions) {
        self.0 |= rhs.0;
    }
}

/// Per-chunk callbacks for [`Subprocess::launch`].
///
/// A stream without a callback is not captured.
#[derive(Default)]
pub struct OutputHandlers {
    stdout: Option<ChunkHandler>,
    stderr: Option<ChunkHandler>,
}

impl OutputHandlers {
    pub fn new() -> OutputHandlers {
        OutputHandlers::default()
    }

    pub fn stdout(mut self, handler: impl FnMut(Bytes) + Send + 'static) -> OutputHandlers {
        self.stdout = Some(Box::new(handler));
        self
    }

    pub fn stderr(mut self, handler: impl FnMut(Bytes) + Send + 'static) -> OutputHandlers {
        self.stderr = Some(Box::new(handler));
        self
    }
}

impl fmt::Debug for OutputHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputHandlers")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Progress of a [`Subprocess`] session.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub enum SessionPhase {
    /// Not started yet.
    Created,
    /// The process is running.
    Started,
    /// The process has exited; output is still being drained.
    AwaitingDrain,
    /// The process has exited and every stream has been drained, or the launch failed.
    Completed,
}

/// Streams and completion handle of a started session, see [`Subprocess::start`].
#[derive(Debug)]
pub struct Started {
    /// Standard output; [`OutputStream::empty`] unless captured.
    pub stdout: OutputStream,
    /// Standard error; [`OutputStream::empty`] unless captured.
    pub stderr: OutputStream,
    pub completion: Completion,
}

/// One invocation of a command.
///
/// A session launches its process once: a second `start` or `launch` fails with
/// [`Error::AlreadyStarted`]. The process handle is created by the session's
/// [`ProcessFactory`] when the session is constructed.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() -> procpipe::Result<()> {
/// use futures::StreamExt;
/// use procpipe::{Command, OutputOptions, Started, Subprocess};
///
/// let session = Subprocess::new(Command::new("ls").arg("-l"));
/// let Started { stdout, completion, .. } = session.start(None, OutputOptions::STDOUT)?;
/// let mut lines = stdout.lines();
/// while let Some(line) = lines.next().await {
///     println!("{line}");
/// }
/// let status = completion.await?;
/// assert!(status.success());
/// # Ok(())
/// # }
/// ```
pub struct Subprocess {
    command: Command,
    factory: Arc<dyn ProcessFactory>,
    process: Arc<dyn ProcessHandle>,
    phase: Arc<Mutex<SessionPhase>>,
}

impl Subprocess {
    /// Creates a session that launches `command` through the [`default_factory`].
    pub fn new(command: Command) -> Subprocess {
        Subprocess::with_factory(command, default_factory())
    }

    /// Creates a session whose process and stdin feed come from `factory`.
    pub fn with_factory(command: Command, factory: Arc<dyn ProcessFactory>) -> Subprocess {
        let process = factory.create_process(&command);
        Subprocess {
            command,
            factory,
            process,
            phase: Arc::new(Mutex::new(SessionPhase::Created)),
        }
    }

    /// Launches the process and returns its output streams.
    ///
    /// Streams selected by `options` are delivered through [`Started::stdout`] and
    /// [`Started::stderr`]; the others are discarded. `input`, if given, is written to
    /// the child's stdin, which is then closed; without it stdin is empty.
    ///
    /// Launch failures are reported here and no completion is handed out. A captured
    /// stream is buffered in memory until read, so reading it is never required to avoid
    /// a deadlock, but an unread stream grows without bound.
    pub fn start(&self, input: Option<Input>, options: OutputOptions) -> Result<Started> {
        let (stdout, stdout_sink) = capture_stream(options.contains(OutputOptions::STDOUT));
        let (stderr, stderr_sink) = capture_stream(options.contains(OutputOptions::STDERR));
        let completion = self.begin(input, stdout_sink, stderr_sink)?;
        Ok(Started {
            stdout,
            stderr,
            completion,
        })
    }

    /// Launches the process, delivering output chunks to the given callbacks.
    ///
    /// The callbacks run on the runtime's worker threads. The returned [`Completion`]
    /// resolves after the last callback has returned.
    pub fn launch(&self, input: Option<Input>, handlers: OutputHandlers) -> Result<Completion> {
        self.begin(
            input,
            handlers.stdout.map(OutputSink::Handler),
            handlers.stderr.map(OutputSink::Handler),
        )
    }

    fn begin(
        &self,
        input: Option<Input>,
        stdout: Option<OutputSink>,
        stderr: Option<OutputSink>,
    ) -> Result<Completion> {
        {
            let mut phase = self.lock_phase();
            if *phase != SessionPhase::Created {
                return Err(Error::AlreadyStarted);
            }
            *phase = SessionPhase::Started;
        }
        let launched = self.spawn_pumps(input, stdout, stderr);
        if launched.is_err() {
            *self.lock_phase() = SessionPhase::Completed;
        }
        launched
    }

    fn spawn_pumps(
        &self,
        input: Option<Input>,
        stdout: Option<OutputSink>,
        stderr: Option<OutputSink>,
    ) -> Result<Completion> {
        // Encoding and file errors surface before anything is spawned.
        let feed: Option<InputFeed> = input
            .map(|input| input.into_feed(&*self.factory))
            .transpose()?;

        let stdio = StdioConfig {
            stdin: redirect_if(feed.is_some()),
            stdout: redirect_if(stdout.is_some()),
            stderr: redirect_if(stderr.is_some()),
            input: feed.as_ref().map(|feed| feed.origin().clone()),
        };
        let launched = self
            .process
            .launch(stdio)
            .map_err(|source| Error::Spawn {
                program: self.command.to_cmdline_lossy(),
                source,
            })?;

        let writer = match (launched.stdin, feed) {
            (Some(pipe), Some(feed)) => Some(pump::spawn_writer(pipe, feed)),
            _ => None,
        };
        let readers = reader("stdout", launched.stdout, stdout)
            .into_iter()
            .chain(reader("stderr", launched.stderr, stderr))
            .collect();
        let driver = tokio::spawn(drive(
            launched.exit,
            writer,
            readers,
            Arc::clone(&self.phase),
        ));

        Ok(Completion {
            process: Arc::clone(&self.process),
            driver: Some(driver),
            done: false,
        })
    }

    fn lock_phase(&self) -> MutexGuard<'_, SessionPhase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn phase(&self) -> SessionPhase {
        *self.lock_phase()
    }

    pub fn state(&self) -> ProcessState {
        self.process.state()
    }

    /// Process identifier, or `None` before launch.
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    /// Exit code, or the signal number if the process was killed. Zero until exit.
    pub fn exit_code(&self) -> i32 {
        self.process.exit_code()
    }

    pub fn termination_reason(&self) -> TerminationReason {
        self.process.termination_reason()
    }

    /// Pauses the process; `false` if unsupported or not running.
    pub fn suspend(&self) -> bool {
        self.process.suspend()
    }

    /// Continues a paused process; `false` if unsupported or not running.
    pub fn resume(&self) -> bool {
        self.process.resume()
    }

    /// Asks the process to terminate. Does nothing once it has exited.
    pub fn terminate(&self) {
        self.process.terminate()
    }
}

impl fmt::Debug for Subprocess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subprocess")
            .field("command", &self.command)
            .field("phase", &self.phase())
            .field("process", &self.process)
            .finish()
    }
}

fn redirect_if(piped: bool) -> Redirection {
    if piped {
        Redirection::Pipe
    } else {
        Redirection::Null
    }
}

fn capture_stream(captured: bool) -> (OutputStream, Option<OutputSink>) {
    if captured {
        let (tx, rx) = mpsc::unbounded_channel();
        (OutputStream::new(rx), Some(OutputSink::Channel(tx)))
    } else {
        (OutputStream::empty(), None)
    }
}

fn reader(
    name: &'static str,
    pipe: Option<ChildOutput>,
    sink: Option<OutputSink>,
) -> Option<JoinHandle<()>> {
    match (pipe, sink) {
        (Some(pipe), Some(sink)) => Some(pump::spawn_reader(name, pipe, sink)),
        _ => None,
    }
}

// Advances the session phase as the process exits and its pumps finish. Spawned as its
// own task: the phase reaches Completed even if the Completion is dropped.
async fn drive(
    exit: oneshot::Receiver<Termination>,
    writer: Option<JoinHandle<()>>,
    readers: Vec<JoinHandle<()>>,
    phase: Arc<Mutex<SessionPhase>>,
) -> Result<Termination> {
    let termination = exit.await;
    set_phase(&phase, SessionPhase::AwaitingDrain);

    let mut pumps = Vec::with_capacity(3);
    if let Some(writer) = writer {
        // The child can no longer read; input not yet written is dropped.
        writer.abort();
        pumps.push(writer);
    }
    pumps.extend(readers);
    let results = join_all(pumps).await;
    set_phase(&phase, SessionPhase::Completed);

    for result in results {
        if let Err(e) = result {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }
    termination.map_err(|_| {
        Error::Io(io::Error::other(
            "process handle dropped without reporting an exit",
        ))
    })
}

fn set_phase(phase: &Mutex<SessionPhase>, next: SessionPhase) {
    *phase.lock().unwrap_or_else(|e| e.into_inner()) = next;
}

/// Resolves once the process has exited and every stream pump has finished.
///
/// Await it directly, or use [`wait`](Self::wait) or [`wait_or_cancel`](Self::wait_or_cancel).
/// Dropping a `Completion` before it resolves, including dropping the future returned
/// by `wait`, terminates the process, so an abandoned wait never leaves the child
/// running. Output is still drained in the background after that, and the session's
/// phase reaches [`SessionPhase::Completed`] once the process has exited.
#[must_use = "dropping a Completion terminates the process"]
pub struct Completion {
    process: Arc<dyn ProcessHandle>,
    driver: Option<JoinHandle<Result<Termination>>>,
    done: bool,
}

impl Completion {
    /// Waits for the process to exit and its output to be fully delivered.
    pub async fn wait(mut self) -> Result<Termination> {
        self.join().await
    }

    /// Like [`wait`](Self::wait), but terminates the process and fails with
    /// [`Error::Cancelled`] if `signal` resolves first.
    ///
    /// Returns as soon as termination has been requested, without waiting for the
    /// process to actually exit.
    pub async fn wait_or_cancel(mut self, signal: impl Future<Output = ()>) -> Result<Termination> {
        let process = Arc::clone(&self.process);
        tokio::select! {
            result = self.join() => result,
            () = signal => {
                debug!(pid = ?process.pid(), "wait cancelled, terminating");
                process.terminate();
                Err(Error::Cancelled)
            }
        }
    }

    async fn join(&mut self) -> Result<Termination> {
        let Some(driver) = self.driver.as_mut() else {
            return Err(Error::Io(io::Error::other("completion already awaited")));
        };
        let result = match driver.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(Error::Io(io::Error::other(e))),
        };
        self.driver = None;
        self.done = true;
        result
    }
}

impl IntoFuture for Completion {
    type Output = Result<Termination>;
    type IntoFuture = BoxFuture<'static, Result<Termination>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.done {
            debug!(pid = ?self.process.pid(), "completion dropped, terminating");
            self.process.terminate();
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("process", &self.process)
            .field("done", &self.done)
            .finish()
    }
}
