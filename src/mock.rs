//! Fake processes for testing code that runs commands.
//!
//! A [`MockFactory`] stands in for the system [`ProcessFactory`]: handed to
//! [`Subprocess::with_factory`](crate::Subprocess::with_factory) or
//! [`Runner::with_factory`](crate::Runner::with_factory), it answers each command with a
//! [`FakeProcess`] registered in advance. A fake process runs an async *script* that
//! writes to its output streams, reads its stdin and finally exits; the session, pumps and
//! runner above it run exactly as they would for a real process.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::sync::Arc;
//! use procpipe::mock::MockFactory;
//! use procpipe::{Command, Error, Runner};
//!
//! let mocks = MockFactory::new();
//! mocks.stub(["git", "status"], |process| async move {
//!     process.write_stdout("foo").await;
//!     process.exit(3);
//! });
//!
//! let runner = Runner::with_factory(Arc::new(mocks.clone()));
//! match runner.capture(&Command::from_argv(["git", "status"]), None).await {
//!     Err(Error::NonZeroExit { status: 3, stdout, .. }) => assert_eq!(stdout, b"foo"),
//!     other => panic!("unexpected result: {other:?}"),
//! }
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::io::{self, ErrorKind};
use std::panic::Location;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::command::Command;
use crate::factory::ProcessFactory;
use crate::input::{Input, InputFeed, InputOrigin};
use crate::process::{
    ChildInput, ChildOutput, Launched, ProcessHandle, ProcessState, Redirection, StdioConfig,
    Termination, TerminationNotifier, TerminationReason,
};

const PIPE_CAPACITY: usize = 64 * 1024;

static NEXT_PID: AtomicU32 = AtomicU32::new(40_000);

/// Behaviour of a fake process, started when the process is launched.
pub type Script = Box<dyn FnOnce(MockProcess) -> BoxFuture<'static, ()> + Send>;

type SignalStub = Box<dyn Fn(&MockProcess) -> bool + Send + Sync>;
type TerminateStub = Box<dyn Fn(&MockProcess) + Send + Sync>;

/// Errors reported by the mock framework.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MockError {
    /// A command was launched that has no stub or expectation.
    ///
    /// Surfaces as the source of [`Error::Spawn`](crate::Error::Spawn).
    #[error("no mock registered for command {0:?}")]
    MissingMock(Vec<String>),

    /// Returned by [`MockFactory::verify`].
    #[error("{} expectation(s) not met", .0.len())]
    MissedExpectations(Vec<ExpectationError>),
}

/// An expectation registered with [`MockFactory::expect`] that was not met.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{location}: {message}")]
pub struct ExpectationError {
    /// Where `expect` was called.
    pub location: &'static Location<'static>,
    pub message: String,
}

enum Plan {
    Run(Script),
    Fail(io::Error),
}

struct Stubs {
    suspend: Option<SignalStub>,
    resume: Option<SignalStub>,
    terminate: Option<TerminateStub>,
}

struct FakeState {
    process: ProcessState,
    pid: Option<u32>,
    plan: Option<Plan>,
    stdin: Option<DuplexStream>,
    notifier: Option<TerminationNotifier>,
    input: Option<InputOrigin>,
}

struct FakeInner {
    argv: Vec<String>,
    stubs: Mutex<Stubs>,
    state: Mutex<FakeState>,
    // Held across a whole write so concurrent writes queue up instead of being lost.
    stdout: AsyncMutex<Option<DuplexStream>>,
    stderr: AsyncMutex<Option<DuplexStream>>,
}

#[derive(Copy, Clone)]
enum Pipe {
    Stdout,
    Stderr,
}

impl FakeInner {
    fn lock_state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn writer(&self, pipe: Pipe) -> &AsyncMutex<Option<DuplexStream>> {
        match pipe {
            Pipe::Stdout => &self.stdout,
            Pipe::Stderr => &self.stderr,
        }
    }

    async fn write(&self, pipe: Pipe, data: &[u8]) {
        let mut writer = self.writer(pipe).lock().await;
        // not captured, or already closed by exit()
        let Some(stream) = writer.as_mut() else { return };
        let written = stream.write_all(data).await;
        // exit() can't close a pipe while a write holds it, so that is done here.
        let state = self.lock_state();
        if written.is_err() || state.process != ProcessState::Running {
            *writer = None;
        }
        drop(writer);
        drop(state);
    }

    fn exit(&self, termination: Termination) {
        let notifier = {
            let mut state = self.lock_state();
            if state.process != ProcessState::Running {
                return;
            }
            state.process = ProcessState::Exited(termination);
            // Dropping the child ends lets the pumps see end of stream. A pipe that is
            // locked by a write in progress is closed by that write.
            state.stdin = None;
            for pipe in [&self.stdout, &self.stderr] {
                if let Ok(mut writer) = pipe.try_lock() {
                    *writer = None;
                }
            }
            state.notifier.take()
        };
        debug!(argv = ?self.argv, %termination, "fake process exited");
        if let Some(notifier) = notifier {
            notifier.notify(termination);
        }
    }
}

/// Handle given to a fake process's script.
#[derive(Clone)]
pub struct MockProcess(Arc<FakeInner>);

impl MockProcess {
    /// Writes to the fake's stdout. Ignored if stdout isn't captured or after exit.
    pub async fn write_stdout(&self, data: impl AsRef<[u8]>) {
        self.0.write(Pipe::Stdout, data.as_ref()).await
    }

    /// Writes to the fake's stderr. Ignored if stderr isn't captured or after exit.
    pub async fn write_stderr(&self, data: impl AsRef<[u8]>) {
        self.0.write(Pipe::Stderr, data.as_ref()).await
    }

    /// Reads the fake's stdin until the session closes it.
    ///
    /// Returns nothing if no input was given, or if stdin has already been read.
    pub async fn read_stdin(&self) -> Vec<u8> {
        let reader = self.0.lock_state().stdin.take();
        let mut data = Vec::new();
        if let Some(mut reader) = reader {
            // on error, return what arrived so far
            let _ = reader.read_to_end(&mut data).await;
        }
        data
    }

    /// Exits normally with `code`. Does nothing if the fake has already exited.
    pub fn exit(&self, code: i32) {
        self.0.exit(Termination::exited(code))
    }

    /// Exits with an arbitrary status and reason.
    pub fn exit_with(&self, code: i32, reason: TerminationReason) {
        self.0.exit(Termination { code, reason })
    }

    pub fn pid(&self) -> Option<u32> {
        self.0.lock_state().pid
    }

    pub fn is_running(&self) -> bool {
        self.0.lock_state().process == ProcessState::Running
    }
}

impl fmt::Debug for MockProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProcess")
            .field("argv", &self.0.argv)
            .field("pid", &self.pid())
            .finish()
    }
}

/// A [`ProcessHandle`] driven by a script instead of the operating system.
///
/// Pipes are in-memory. The script is spawned onto the Tokio runtime at launch and keeps
/// the process running until it calls [`MockProcess::exit`]; a script that returns
/// without exiting leaves the fake running until it is terminated.
///
/// Unless stubbed, `suspend` and `resume` report `false` and `terminate` exits with
/// status 15 and [`TerminationReason::UncaughtSignal`]. A terminate stub replaces that
/// behaviour entirely, so it is expected to call `exit` itself.
pub struct FakeProcess(Arc<FakeInner>);

impl FakeProcess {
    /// A fake that runs `script` when launched.
    pub fn new<F, Fut>(argv: impl IntoIterator<Item = impl Into<String>>, script: F) -> FakeProcess
    where
        F: FnOnce(MockProcess) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let script: Script = Box::new(move |process| script(process).boxed());
        FakeProcess::with_plan(argv, Plan::Run(script))
    }

    /// A fake whose launch fails with `error`.
    pub fn failing(
        argv: impl IntoIterator<Item = impl Into<String>>,
        error: io::Error,
    ) -> FakeProcess {
        FakeProcess::with_plan(argv, Plan::Fail(error))
    }

    fn with_plan(argv: impl IntoIterator<Item = impl Into<String>>, plan: Plan) -> FakeProcess {
        FakeProcess(Arc::new(FakeInner {
            argv: argv.into_iter().map(Into::into).collect(),
            stubs: Mutex::new(Stubs {
                suspend: None,
                resume: None,
                terminate: None,
            }),
            state: Mutex::new(FakeState {
                process: ProcessState::NotStarted,
                pid: None,
                plan: Some(plan),
                stdin: None,
                notifier: None,
                input: None,
            }),
            stdout: AsyncMutex::new(None),
            stderr: AsyncMutex::new(None),
        }))
    }

    fn stubs(&self) -> MutexGuard<'_, Stubs> {
        self.0.stubs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the default `suspend` behaviour.
    pub fn on_suspend(
        self,
        stub: impl Fn(&MockProcess) -> bool + Send + Sync + 'static,
    ) -> FakeProcess {
        self.stubs().suspend = Some(Box::new(stub));
        self
    }

    /// Replaces the default `resume` behaviour.
    pub fn on_resume(
        self,
        stub: impl Fn(&MockProcess) -> bool + Send + Sync + 'static,
    ) -> FakeProcess {
        self.stubs().resume = Some(Box::new(stub));
        self
    }

    /// Replaces the default `terminate` behaviour.
    pub fn on_terminate(self, stub: impl Fn(&MockProcess) + Send + Sync + 'static) -> FakeProcess {
        self.stubs().terminate = Some(Box::new(stub));
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.0.argv
    }

    /// Where the stdin feed given at launch came from, if any.
    pub fn input(&self) -> Option<InputOrigin> {
        self.0.lock_state().input.clone()
    }

    fn handle(&self) -> MockProcess {
        MockProcess(Arc::clone(&self.0))
    }
}

// Child end kept by the fake, parent end handed to the session.
fn pipe(redirection: Redirection) -> (Option<DuplexStream>, Option<DuplexStream>) {
    match redirection {
        Redirection::Pipe => {
            let (child, parent) = tokio::io::duplex(PIPE_CAPACITY);
            (Some(child), Some(parent))
        }
        Redirection::Null | Redirection::Inherit => (None, None),
    }
}

impl ProcessHandle for FakeProcess {
    fn launch(&self, stdio: StdioConfig) -> io::Result<Launched> {
        let mut state = self.0.lock_state();
        if state.process != ProcessState::NotStarted {
            return Err(io::Error::other("process has already been launched"));
        }
        let script = match state.plan.take() {
            Some(Plan::Run(script)) => script,
            Some(Plan::Fail(e)) => {
                state.process = ProcessState::Failed(e.kind());
                return Err(e);
            }
            None => return Err(io::Error::other("process has already been launched")),
        };

        let (stdin, stdin_parent) = pipe(stdio.stdin);
        let (stdout, stdout_parent) = pipe(stdio.stdout);
        let (stderr, stderr_parent) = pipe(stdio.stderr);
        let (notifier, exit) = TerminationNotifier::channel();

        match (self.0.stdout.try_lock(), self.0.stderr.try_lock()) {
            (Ok(mut out), Ok(mut err)) => {
                *out = stdout;
                *err = stderr;
            }
            _ => {
                state.process = ProcessState::Failed(ErrorKind::Other);
                return Err(io::Error::other("fake process pipes are in use"));
            }
        }

        let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
        state.pid = Some(pid);
        state.process = ProcessState::Running;
        state.stdin = stdin;
        state.notifier = Some(notifier);
        state.input = stdio.input;
        drop(state);

        debug!(pid, argv = ?self.0.argv, "launched fake process");
        tokio::spawn(script(self.handle()));

        Ok(Launched::new(
            stdin_parent.map(|p| Box::new(p) as ChildInput),
            stdout_parent.map(|p| Box::new(p) as ChildOutput),
            stderr_parent.map(|p| Box::new(p) as ChildOutput),
            exit,
        ))
    }

    fn state(&self) -> ProcessState {
        self.0.lock_state().process
    }

    fn pid(&self) -> Option<u32> {
        self.0.lock_state().pid
    }

    fn suspend(&self) -> bool {
        match &self.stubs().suspend {
            Some(stub) => stub(&self.handle()),
            None => false,
        }
    }

    fn resume(&self) -> bool {
        match &self.stubs().resume {
            Some(stub) => stub(&self.handle()),
            None => false,
        }
    }

    fn terminate(&self) {
        if !self.is_running() {
            return;
        }
        match &self.stubs().terminate {
            Some(stub) => stub(&self.handle()),
            None => self.0.exit(Termination::signaled(15)),
        }
    }
}

impl fmt::Debug for FakeProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.lock_state();
        f.debug_struct("FakeProcess")
            .field("argv", &self.0.argv)
            .field("pid", &state.pid)
            .field("state", &state.process)
            .finish()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum ExpectedInput {
    Data(Bytes),
    File(std::path::PathBuf),
    Stream,
}

impl From<Input> for ExpectedInput {
    fn from(input: Input) -> ExpectedInput {
        match input {
            Input::Bytes(data) => ExpectedInput::Data(data),
            Input::Text(text, encoding) => ExpectedInput::Data(Bytes::from(
                encoding
                    .encode(&text)
                    .unwrap_or_else(|| text.into_bytes()),
            )),
            Input::File(path) => ExpectedInput::File(path),
            Input::Stream(_) => ExpectedInput::Stream,
        }
    }
}

struct Expectation {
    input: Option<ExpectedInput>,
    location: &'static Location<'static>,
}

struct MockItem {
    argv: Vec<String>,
    process: Arc<FakeProcess>,
    expectation: Option<Expectation>,
    used: bool,
}

/// A [`ProcessFactory`] that serves registered fake processes.
///
/// Each registration answers one launch of a command with the same argument vector, in
/// registration order; the environment is not compared. Launching a command with no
/// unused registration fails with [`MockError::MissingMock`].
///
/// Clones share their registrations, so a test can keep one clone for verification
/// while the code under test owns another.
#[derive(Clone, Default)]
pub struct MockFactory {
    mocks: Arc<Mutex<Vec<MockItem>>>,
}

impl MockFactory {
    pub fn new() -> MockFactory {
        MockFactory::default()
    }

    fn lock_mocks(&self) -> MutexGuard<'_, Vec<MockItem>> {
        self.mocks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, process: FakeProcess, expectation: Option<Expectation>) {
        self.lock_mocks().push(MockItem {
            argv: process.argv().to_vec(),
            process: Arc::new(process),
            expectation,
            used: false,
        });
    }

    /// Answers `argv` with a fake running `script`.
    pub fn stub<F, Fut>(&self, argv: impl IntoIterator<Item = impl Into<String>>, script: F)
    where
        F: FnOnce(MockProcess) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(FakeProcess::new(argv, script), None);
    }

    /// Answers with a preconfigured fake, e.g. one with signal stubs.
    pub fn stub_process(&self, process: FakeProcess) {
        self.register(process, None);
    }

    /// Answers `argv` with a fake that prints `stdout` and `stderr` and exits with `code`.
    pub fn stub_output(
        &self,
        argv: impl IntoIterator<Item = impl Into<String>>,
        stdout: impl Into<Bytes>,
        stderr: impl Into<Bytes>,
        code: i32,
    ) {
        let (stdout, stderr) = (stdout.into(), stderr.into());
        self.stub(argv, move |process| async move {
            process.write_stdout(&stdout).await;
            process.write_stderr(&stderr).await;
            process.exit(code);
        });
    }

    /// Answers `argv` with a fake whose launch fails with an error of the given kind.
    pub fn stub_error(&self, argv: impl IntoIterator<Item = impl Into<String>>, kind: ErrorKind) {
        self.register(
            FakeProcess::failing(argv, io::Error::new(kind, "stubbed launch failure")),
            None,
        );
    }

    /// Like [`stub`](Self::stub), and additionally checks in [`verify`](Self::verify)
    /// that the command was launched with the given stdin.
    ///
    /// Data and text are compared by bytes, files by path. A stream input matches any
    /// stream.
    #[track_caller]
    pub fn expect<F, Fut>(
        &self,
        argv: impl IntoIterator<Item = impl Into<String>>,
        input: Option<Input>,
        script: F,
    ) where
        F: FnOnce(MockProcess) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.expect_process(FakeProcess::new(argv, script), input);
    }

    /// Like [`expect`](Self::expect), with a preconfigured fake.
    #[track_caller]
    pub fn expect_process(&self, process: FakeProcess, input: Option<Input>) {
        let expectation = Expectation {
            input: input.map(ExpectedInput::from),
            location: Location::caller(),
        };
        self.register(process, Some(expectation));
    }

    /// Checks every expectation, reports each failure to `missed`, then resets.
    pub fn verify_with(&self, mut missed: impl FnMut(ExpectationError)) {
        let mocks = std::mem::take(&mut *self.lock_mocks());
        for item in mocks {
            let Some(expectation) = item.expectation else {
                continue;
            };
            let message = if item.used {
                check_input(expectation.input.as_ref(), item.process.input().as_ref())
            } else {
                Some("Command not called".to_string())
            };
            if let Some(message) = message {
                missed(ExpectationError {
                    location: expectation.location,
                    message,
                });
            }
        }
    }

    /// Checks every expectation, then resets.
    pub fn verify(&self) -> Result<(), MockError> {
        let mut errors = Vec::new();
        self.verify_with(|e| errors.push(e));
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MockError::MissedExpectations(errors))
        }
    }

    /// Forgets all registrations.
    pub fn reset(&self) {
        self.lock_mocks().clear();
    }
}

fn check_input(expected: Option<&ExpectedInput>, actual: Option<&InputOrigin>) -> Option<String> {
    let expected_file = match expected {
        Some(ExpectedInput::File(path)) => Some(path.as_path()),
        _ => None,
    };
    let actual_file = match actual {
        Some(InputOrigin::File(path)) => Some(path.as_path()),
        _ => None,
    };
    match (expected_file, actual_file) {
        (Some(expected), Some(actual)) if expected != actual => {
            return Some(format!(
                "Input file paths do not match {} != {}",
                expected.display(),
                actual.display()
            ));
        }
        (Some(_), None) => return Some("Missing file input".to_string()),
        (None, Some(actual)) => {
            return Some(format!("Unexpected input file {}", actual.display()));
        }
        _ => {}
    }

    match (expected, actual) {
        (Some(ExpectedInput::Data(expected)), Some(InputOrigin::Bytes(actual))) => {
            if expected == actual {
                None
            } else {
                Some(data_mismatch(expected, actual))
            }
        }
        (Some(ExpectedInput::Data(_)), Some(InputOrigin::Stream)) => {
            Some("Input data does not match expected input data".to_string())
        }
        (Some(ExpectedInput::Data(_)), None) => Some("Missing data input".to_string()),
        (Some(ExpectedInput::Stream), Some(InputOrigin::Stream)) => None,
        (Some(ExpectedInput::Stream), _) => Some("Missing stream input".to_string()),
        (None, Some(InputOrigin::Bytes(actual))) => Some(match std::str::from_utf8(actual) {
            Ok(text) => format!("Unexpected input text: {text}"),
            Err(_) => "Unexpected input data".to_string(),
        }),
        (None, Some(InputOrigin::Stream)) => Some("Unexpected input data".to_string()),
        _ => None,
    }
}

fn data_mismatch(expected: &[u8], actual: &[u8]) -> String {
    match (std::str::from_utf8(actual), std::str::from_utf8(expected)) {
        (Ok(actual), Ok(expected)) => {
            format!("Input text does not match expected input text {actual} != {expected}")
        }
        _ => "Input data does not match expected input data".to_string(),
    }
}

impl ProcessFactory for MockFactory {
    fn create_process(&self, command: &Command) -> Arc<dyn ProcessHandle> {
        let mut mocks = self.lock_mocks();
        match mocks
            .iter_mut()
            .find(|item| !item.used && item.argv == command.argv())
        {
            Some(item) => {
                item.used = true;
                Arc::clone(&item.process) as Arc<dyn ProcessHandle>
            }
            None => {
                let argv = command.argv().to_vec();
                let error = io::Error::new(
                    ErrorKind::NotFound,
                    MockError::MissingMock(argv.clone()),
                );
                Arc::new(FakeProcess::failing(argv, error))
            }
        }
    }

    fn create_input_pipe(&self, data: Bytes) -> InputFeed {
        InputFeed::from_bytes(data)
    }

    fn create_input_file(&self, path: &Path) -> io::Result<InputFeed> {
        Ok(InputFeed::from_reader(
            InputOrigin::File(path.to_owned()),
            tokio::io::empty(),
        ))
    }
}

impl fmt::Debug for MockFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mocks = self.lock_mocks();
        f.debug_list()
            .entries(mocks.iter().map(|item| (&item.argv, item.used)))
            .finish()
    }
}
