use std::io;
use std::path::PathBuf;

use crate::input::Encoding;
use crate::process::TerminationReason;

/// Errors produced while launching, feeding, or awaiting a subprocess.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The process could not be created: executable not found, permission denied, or OS
    /// resource exhaustion.
    ///
    /// Reported synchronously by [`Subprocess::start`](crate::Subprocess::start) and
    /// friends; no process is left running.
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        /// The command line that failed to launch, quoted for display.
        program: String,
        #[source]
        source: io::Error,
    },

    /// Text input could not be represented in the requested encoding.
    ///
    /// Reported before any process is spawned.
    #[error("input text could not be encoded as {0}")]
    InputEncoding(Encoding),

    /// The file supplied as standard input could not be opened.
    #[error("failed to open input file {}: {source}", path.display())]
    InputFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The process ran to completion but did not exit with status zero.
    ///
    /// Carries whatever was captured from both output streams.
    #[error("command failed: exit status {status} ({reason})")]
    NonZeroExit {
        status: i32,
        reason: TerminationReason,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },

    /// The wait was cancelled; the process was terminated as a side effect.
    #[error("wait cancelled; the process was terminated")]
    Cancelled,

    /// A session was started a second time.
    #[error("subprocess has already been started")]
    AlreadyStarted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the exit status for [`Error::NonZeroExit`].
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            Error::NonZeroExit { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the captured standard error for [`Error::NonZeroExit`], decoded lossily.
    pub fn stderr_str(&self) -> Option<String> {
        match self {
            Error::NonZeroExit { stderr, .. } => Some(String::from_utf8_lossy(stderr).into_owned()),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
