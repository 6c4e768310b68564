use std::cmp::min;
use std::fmt;
use std::io::{self, ErrorKind};
use std::process::{Child, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use crate::command::Command;
#[cfg(unix)]
use crate::posix;
use crate::process::{
    ChildInput, ChildOutput, Launched, ProcessHandle, ProcessState, Redirection, StdioConfig,
    Termination, TerminationNotifier,
};

/// A real operating-system process.
///
/// Created by [`SystemFactory`](crate::SystemFactory). The child is spawned by
/// [`launch`](ProcessHandle::launch); from then on a dedicated thread watches for its exit
/// and delivers the exit notice exactly once.
///
/// Signals are only sent while the child is known not to have been reaped, so a
/// terminate that races with a natural exit can never reach a process that reused the
/// PID.
#[derive(Clone)]
pub struct OsProcess(Arc<Inner>);

struct Inner {
    command: Command,
    state: Mutex<OsState>,
}

struct OsState {
    process: ProcessState,
    pid: Option<u32>,
    child: Option<Child>,
}

impl OsProcess {
    pub fn new(command: Command) -> OsProcess {
        OsProcess(Arc::new(Inner {
            command,
            state: Mutex::new(OsState {
                process: ProcessState::NotStarted,
                pid: None,
                child: None,
            }),
        }))
    }

    pub fn command(&self) -> &Command {
        &self.0.command
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, OsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_child(&self, stdio: &StdioConfig) -> io::Result<(Child, Pipes)> {
        let Some((program, args)) = self.command.argv().split_first() else {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "argv must not be empty",
            ));
        };

        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            .stdin(to_stdio(stdio.stdin))
            .stdout(to_stdio(stdio.stdout))
            .stderr(to_stdio(stdio.stderr));
        if let Some(vars) = self.command.environment_vars() {
            cmd.env_clear().envs(vars);
        }

        // Wrapping the pipes needs a reactor; check before there is a child to clean up.
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(io::Error::other(
                "processes must be launched from within a Tokio runtime",
            ));
        }

        #[cfg(unix)]
        posix::ignore_sigpipe();

        let mut child = cmd.spawn()?;
        match Pipes::take_from(&mut child) {
            Ok(pipes) => Ok((child, pipes)),
            Err(e) => {
                // don't leave a half-started child behind
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    fn monitor(&self, pid: u32, notifier: TerminationNotifier) {
        #[cfg(unix)]
        if let Err(e) = posix::wait_exited_nowait(pid) {
            warn!(pid, error = %e, "waitid failed, falling back to polling");
        }
        let termination = self.reap();
        debug!(pid, %termination, "process exited");
        notifier.notify(termination);
    }

    // Collect the exit status. The state lock is held while reaping, which is what keeps
    // send_signal() from racing with PID reuse.
    fn reap(&self) -> Termination {
        let mut delay = Duration::from_millis(1);
        loop {
            let mut state = self.lock_state();
            let polled = match state.child.as_mut() {
                Some(child) => child.try_wait(),
                None => Err(io::Error::other("child handle missing")),
            };
            match polled {
                Ok(Some(status)) => {
                    let termination = Termination::from(status);
                    state.process = ProcessState::Exited(termination);
                    state.child = None;
                    return termination;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(pid = ?state.pid, error = %e, "cannot determine exit status");
                    let termination = Termination::exited(-1);
                    state.process = ProcessState::Exited(termination);
                    state.child = None;
                    return termination;
                }
            }
            // Release the lock while sleeping so signals can still be delivered.
            drop(state);
            thread::sleep(delay);
            delay = min(delay * 2, Duration::from_millis(100));
        }
    }
}

fn to_stdio(redirection: Redirection) -> Stdio {
    match redirection {
        Redirection::Null => Stdio::null(),
        Redirection::Pipe => Stdio::piped(),
        Redirection::Inherit => Stdio::inherit(),
    }
}

struct Pipes {
    stdin: Option<ChildInput>,
    stdout: Option<ChildOutput>,
    stderr: Option<ChildOutput>,
}

impl Pipes {
    // Registers the parent ends with the Tokio reactor.
    fn take_from(child: &mut Child) -> io::Result<Pipes> {
        let stdin = match child.stdin.take() {
            Some(s) => Some(Box::new(ChildStdin::from_std(s)?) as ChildInput),
            None => None,
        };
        let stdout = match child.stdout.take() {
            Some(s) => Some(Box::new(ChildStdout::from_std(s)?) as ChildOutput),
            None => None,
        };
        let stderr = match child.stderr.take() {
            Some(s) => Some(Box::new(ChildStderr::from_std(s)?) as ChildOutput),
            None => None,
        };
        Ok(Pipes {
            stdin,
            stdout,
            stderr,
        })
    }
}

impl ProcessHandle for OsProcess {
    fn launch(&self, stdio: StdioConfig) -> io::Result<Launched> {
        let mut state = self.0.lock_state();
        if state.process != ProcessState::NotStarted {
            return Err(io::Error::other("process has already been launched"));
        }

        let (child, pipes) = match self.0.spawn_child(&stdio) {
            Ok(spawned) => spawned,
            Err(e) => {
                state.process = ProcessState::Failed(e.kind());
                return Err(e);
            }
        };
        let pid = child.id();
        state.pid = Some(pid);
        state.child = Some(child);
        state.process = ProcessState::Running;

        let (notifier, exit) = TerminationNotifier::channel();
        let inner = Arc::clone(&self.0);
        let monitor = thread::Builder::new()
            .name(format!("procpipe-wait-{pid}"))
            .spawn(move || inner.monitor(pid, notifier));
        if let Err(e) = monitor {
            if let Some(mut child) = state.child.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
            state.process = ProcessState::Failed(e.kind());
            return Err(e);
        }

        debug!(pid, cmdline = %self.0.command.to_cmdline_lossy(), "launched process");
        Ok(Launched::new(pipes.stdin, pipes.stdout, pipes.stderr, exit))
    }

    fn state(&self) -> ProcessState {
        self.0.lock_state().process
    }

    fn pid(&self) -> Option<u32> {
        self.0.lock_state().pid
    }

    fn suspend(&self) -> bool {
        os::suspend(&self.0)
    }

    fn resume(&self) -> bool {
        os::resume(&self.0)
    }

    fn terminate(&self) {
        if let Err(e) = os::terminate(&self.0) {
            warn!(pid = ?self.pid(), error = %e, "failed to terminate process");
        }
    }
}

impl fmt::Debug for OsProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.lock_state();
        f.debug_struct("OsProcess")
            .field("command", &self.0.command)
            .field("pid", &state.pid)
            .field("state", &state.process)
            .finish()
    }
}

#[cfg(unix)]
mod os {
    use super::*;

    fn send_signal(inner: &Inner, signal: i32) -> io::Result<bool> {
        let state = inner.lock_state();
        match (state.process, state.pid) {
            (ProcessState::Running, Some(pid)) => posix::kill(pid, signal).map(|()| true),
            _ => Ok(false),
        }
    }

    pub(super) fn suspend(inner: &Inner) -> bool {
        send_signal(inner, posix::SIGSTOP).unwrap_or(false)
    }

    pub(super) fn resume(inner: &Inner) -> bool {
        send_signal(inner, posix::SIGCONT).unwrap_or(false)
    }

    pub(super) fn terminate(inner: &Inner) -> io::Result<()> {
        send_signal(inner, posix::SIGTERM).map(|_| ())
    }
}

#[cfg(not(unix))]
mod os {
    use super::*;

    pub(super) fn suspend(_inner: &Inner) -> bool {
        false
    }

    pub(super) fn resume(_inner: &Inner) -> bool {
        false
    }

    pub(super) fn terminate(inner: &Inner) -> io::Result<()> {
        let mut state = inner.lock_state();
        match (state.process, state.child.as_mut()) {
            (ProcessState::Running, Some(child)) => child.kill(),
            _ => Ok(()),
        }
    }
}
