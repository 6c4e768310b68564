use std::fmt;
use std::io;
use std::sync::Mutex;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::input::InputOrigin;

/// Why a process stopped running.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, Default)]
pub enum TerminationReason {
    /// The process returned from `main` or called `exit`.
    #[default]
    Exit,
    /// The process was killed by a signal it did not handle.
    UncaughtSignal,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Exit => f.write_str("exit"),
            TerminationReason::UncaughtSignal => f.write_str("uncaught signal"),
        }
    }
}

/// How a process ended.
///
/// For [`TerminationReason::Exit`] `code` is the exit code; for
/// [`TerminationReason::UncaughtSignal`] it is the number of the signal that killed the
/// process.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone)]
pub struct Termination {
    pub code: i32,
    pub reason: TerminationReason,
}

impl Termination {
    /// A normal exit with the given code.
    pub fn exited(code: i32) -> Termination {
        Termination {
            code,
            reason: TerminationReason::Exit,
        }
    }

    /// Death by the given signal.
    pub fn signaled(signal: i32) -> Termination {
        Termination {
            code: signal,
            reason: TerminationReason::UncaughtSignal,
        }
    }

    /// True if the process exited normally with status 0.
    pub fn success(&self) -> bool {
        self.reason == TerminationReason::Exit && self.code == 0
    }
}

impl From<std::process::ExitStatus> for Termination {
    fn from(status: std::process::ExitStatus) -> Termination {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Termination::signaled(signal);
            }
        }
        Termination::exited(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            TerminationReason::Exit => write!(f, "exit code {}", self.code),
            TerminationReason::UncaughtSignal => write!(f, "signal {}", self.code),
        }
    }
}

/// Lifecycle of a single process.
///
/// `NotStarted` moves to `Running` on a successful launch or to `Failed` when the launch
/// fails; `Running` moves to `Exited` once the OS reports termination. `Exited` and
/// `Failed` are terminal.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ProcessState {
    NotStarted,
    Running,
    Exited(Termination),
    Failed(io::ErrorKind),
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited(_) | ProcessState::Failed(_))
    }
}

/// What to connect one of the child's standard streams to.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
pub enum Redirection {
    /// The null device. Nothing is read, anything written is thrown away.
    #[default]
    Null,
    /// A pipe whose other end is handed back to the parent in [`Launched`].
    Pipe,
    /// The parent's own stream.
    Inherit,
}

/// Stream endpoints requested for a launch.
#[derive(Debug, Clone, Default)]
pub struct StdioConfig {
    pub stdin: Redirection,
    pub stdout: Redirection,
    pub stderr: Redirection,
    /// Where the data fed into a piped stdin comes from. Real processes ignore it; fakes
    /// record it so that expectations can be verified.
    pub input: Option<InputOrigin>,
}

/// Parent end of the child's stdin pipe.
pub type ChildInput = Box<dyn AsyncWrite + Send + Unpin>;

/// Parent end of one of the child's output pipes.
pub type ChildOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Result of a successful launch: the parent's pipe ends and the exit notice.
///
/// A pipe end is present exactly when the corresponding stream was configured as
/// [`Redirection::Pipe`].
#[non_exhaustive]
pub struct Launched {
    pub stdin: Option<ChildInput>,
    pub stdout: Option<ChildOutput>,
    pub stderr: Option<ChildOutput>,
    /// Resolves once, when the process has been observed to exit.
    pub exit: oneshot::Receiver<Termination>,
}

impl Launched {
    pub fn new(
        stdin: Option<ChildInput>,
        stdout: Option<ChildOutput>,
        stderr: Option<ChildOutput>,
        exit: oneshot::Receiver<Termination>,
    ) -> Launched {
        Launched {
            stdin,
            stdout,
            stderr,
            exit,
        }
    }
}

impl fmt::Debug for Launched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Launched")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// Sending side of the exit notice.
///
/// Fires at most once no matter how many times [`notify`](Self::notify) is called, so
/// natural exit and an explicit terminate can race without double delivery.
#[derive(Debug)]
pub struct TerminationNotifier(Mutex<Option<oneshot::Sender<Termination>>>);

impl TerminationNotifier {
    /// Create a notifier and the receiver handed out in [`Launched::exit`].
    pub fn channel() -> (TerminationNotifier, oneshot::Receiver<Termination>) {
        let (tx, rx) = oneshot::channel();
        (TerminationNotifier(Mutex::new(Some(tx))), rx)
    }

    /// Deliver the termination. Returns `false` if it had already been delivered.
    pub fn notify(&self, termination: Termination) -> bool {
        let sender = self
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            Some(tx) => {
                // the receiver may be gone if nobody waits for completion
                let _ = tx.send(termination);
                true
            }
            None => false,
        }
    }
}

/// A process that can be launched once and observed until it exits.
///
/// This is the seam between the session machinery and the operating system. The real
/// implementation is [`OsProcess`](crate::OsProcess); tests substitute
/// [`FakeProcess`](crate::mock::FakeProcess) through a
/// [`ProcessFactory`](crate::ProcessFactory).
///
/// All methods take `&self` so that a handle can be shared between the session, its
/// completion future and the pumps.
pub trait ProcessHandle: Send + Sync + fmt::Debug {
    /// Start the process with the given stream endpoints.
    ///
    /// Must be called at most once, from within a Tokio runtime. On failure the state
    /// becomes [`ProcessState::Failed`] and no process is left running.
    fn launch(&self, stdio: StdioConfig) -> io::Result<Launched>;

    /// Current lifecycle state.
    fn state(&self) -> ProcessState;

    /// Process identifier, or `None` before a successful launch.
    fn pid(&self) -> Option<u32>;

    /// Pause the process. Returns `false` if unsupported or not running.
    fn suspend(&self) -> bool;

    /// Continue a paused process. Returns `false` if unsupported or not running.
    fn resume(&self) -> bool;

    /// Ask the process to terminate.
    ///
    /// Asynchronous: the process is not guaranteed to have exited on return. Calling
    /// this after the process has exited does nothing.
    fn terminate(&self);

    fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Exit code, or signal number for signal deaths. Zero until the process exits.
    fn exit_code(&self) -> i32 {
        match self.state() {
            ProcessState::Exited(t) => t.code,
            _ => 0,
        }
    }

    /// Termination reason. [`TerminationReason::Exit`] until the process exits.
    fn termination_reason(&self) -> TerminationReason {
        match self.state() {
            ProcessState::Exited(t) => t.reason,
            _ => TerminationReason::Exit,
        }
    }
}
