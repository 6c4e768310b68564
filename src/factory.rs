use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;

use crate::command::Command;
use crate::input::InputFeed;
use crate::process::ProcessHandle;
use crate::spawn::OsProcess;

/// Creates processes and stdin feeds for a session.
///
/// This is the single point where a session touches the operating system. Sessions and
/// runners receive a factory in their constructor; swapping in
/// [`MockFactory`](crate::mock::MockFactory) makes them drive fake processes instead
/// while the rest of the machinery runs unmodified.
pub trait ProcessFactory: Send + Sync {
    /// Create a not-yet-launched process for `command`.
    fn create_process(&self, command: &Command) -> Arc<dyn ProcessHandle>;

    /// Create a stdin feed that writes `data`.
    fn create_input_pipe(&self, data: Bytes) -> InputFeed;

    /// Create a stdin feed that writes the contents of the file at `path`.
    fn create_input_file(&self, path: &Path) -> io::Result<InputFeed>;
}

/// The factory that spawns real OS processes.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemFactory;

impl ProcessFactory for SystemFactory {
    fn create_process(&self, command: &Command) -> Arc<dyn ProcessHandle> {
        Arc::new(OsProcess::new(command.clone()))
    }

    fn create_input_pipe(&self, data: Bytes) -> InputFeed {
        InputFeed::from_bytes(data)
    }

    fn create_input_file(&self, path: &Path) -> io::Result<InputFeed> {
        let file = File::open(path)?;
        Ok(InputFeed::from_file(path, file))
    }
}

/// The factory used when none is given explicitly: a shared [`SystemFactory`].
///
/// Initialised on first use and never replaced; tests inject their own factory through
/// the constructors instead.
pub fn default_factory() -> Arc<dyn ProcessFactory> {
    static DEFAULT: OnceLock<Arc<dyn ProcessFactory>> = OnceLock::new();
    Arc::clone(DEFAULT.get_or_init(|| Arc::new(SystemFactory)))
}
