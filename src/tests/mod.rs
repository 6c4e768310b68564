mod command;
#[cfg(unix)]
mod posix;
#[cfg(unix)]
mod session;
mod stream;

use crate::mock::{FakeProcess, MockFactory, MockProcess};
use crate::{
    Capture, Command, Completion, Error, Input, OsProcess, OutputOptions, OutputStream, Runner,
    Subprocess, SystemFactory, Termination,
};

fn assert_send_sync<T: Send + Sync>() {}
fn assert_send<T: Send>() {}

#[test]
fn public_types_are_send_and_sync() {
    assert_send_sync::<Command>();
    assert_send_sync::<Subprocess>();
    assert_send_sync::<Runner>();
    assert_send_sync::<Capture>();
    assert_send_sync::<Termination>();
    assert_send_sync::<OutputOptions>();
    assert_send_sync::<OsProcess>();
    assert_send_sync::<SystemFactory>();
    assert_send_sync::<FakeProcess>();
    assert_send_sync::<MockProcess>();
    assert_send_sync::<MockFactory>();
    assert_send_sync::<Error>();
    assert_send::<Completion>();
    assert_send::<OutputStream>();
    assert_send::<Input>();
}

/// Installs a log subscriber honouring `RUST_LOG`, once per test binary.
pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
