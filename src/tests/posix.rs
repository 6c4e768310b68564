use std::process::Command;
use std::time::Duration;

use crate::posix;

#[test]
fn wait_without_reaping() {
    let mut child = Command::new("sh").args(["-c", "exit 7"]).spawn().unwrap();
    posix::wait_exited_nowait(child.id()).unwrap();
    // still a zombie, so the status can be collected afterwards
    let status = child.try_wait().unwrap().expect("child should have exited");
    assert_eq!(status.code(), Some(7));
}

#[test]
fn terminate_with_kill() {
    let mut child = Command::new("sleep").arg("5").spawn().unwrap();
    posix::kill(child.id(), posix::SIGTERM).unwrap();
    let status = child.wait().unwrap();
    use std::os::unix::process::ExitStatusExt;
    assert_eq!(status.signal(), Some(posix::SIGTERM));
}

#[test]
fn stop_and_continue() {
    let mut child = Command::new("sleep").arg("0.2").spawn().unwrap();
    posix::kill(child.id(), posix::SIGSTOP).unwrap();
    std::thread::sleep(Duration::from_millis(400));
    // a stopped process doesn't finish its sleep
    assert!(child.try_wait().unwrap().is_none());
    posix::kill(child.id(), posix::SIGCONT).unwrap();
    assert!(child.wait().unwrap().success());
}

#[test]
fn sigpipe_ignored_idempotently() {
    posix::ignore_sigpipe();
    posix::ignore_sigpipe();
}
