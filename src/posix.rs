use std::io::{Error, Result};
use std::mem;
use std::ptr;
use std::sync::Once;

pub use libc::{SIGCONT, SIGSTOP, SIGTERM};

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
    if num < T::default() {
        return Err(Error::last_os_error());
    }
    Ok(num)
}

pub fn kill(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(pid as libc::pid_t, signal) })?;
    Ok(())
}

/// Block until the child `pid` has exited, without reaping it.
///
/// The zombie is left in place so that the caller can decide, under its own lock, when
/// the PID stops being valid. Until then signals sent to `pid` cannot hit an unrelated
/// process that reused the number.
pub fn wait_exited_nowait(pid: u32) -> Result<()> {
    loop {
        let mut info: libc::siginfo_t = unsafe { mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        match check_err(rc) {
            Ok(_) => return Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Make writes to a pipe without a reader fail with `EPIPE` instead of killing us.
///
/// Only a default disposition is replaced; a handler installed by the embedding
/// application is left alone. The Rust runtime normally does this already for binaries,
/// but a library can be loaded by hosts that don't.
pub fn ignore_sigpipe() {
    static IGNORE: Once = Once::new();
    IGNORE.call_once(|| unsafe {
        let mut old: libc::sigaction = mem::zeroed();
        if libc::sigaction(libc::SIGPIPE, ptr::null(), &mut old) == 0
            && old.sa_sigaction == libc::SIG_DFL
        {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
    });
}
