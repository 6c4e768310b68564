use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use tempfile::TempDir;

use super::init_logging;
use crate::{
    Command, Error, Input, OutputHandlers, OutputOptions, ProcessState, SessionPhase, Started,
    Subprocess, Termination, TerminationReason,
};

async fn wait_until_stopped(session: &Subprocess) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.is_running() {
        assert!(Instant::now() < deadline, "process still running");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_until_completed(session: &Subprocess) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.phase() != SessionPhase::Completed {
        assert!(Instant::now() < deadline, "session stuck in {:?}", session.phase());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn good_cmd() {
    init_logging();
    let session = Subprocess::new(Command::new("true"));
    assert_eq!(session.phase(), SessionPhase::Created);
    assert_eq!(session.pid(), None);
    let Started { completion, .. } = session.start(None, OutputOptions::NONE).unwrap();
    let status = completion.await.unwrap();
    assert!(status.success());
    assert_eq!(session.phase(), SessionPhase::Completed);
    assert_eq!(session.state(), ProcessState::Exited(Termination::exited(0)));
    assert!(session.pid().is_some());
}

#[tokio::test]
async fn err_exit() {
    let session = Subprocess::new(Command::shell("exit 13"));
    let Started { completion, .. } = session.start(None, OutputOptions::NONE).unwrap();
    let status = completion.wait().await.unwrap();
    assert_eq!(status, Termination::exited(13));
    assert_eq!(session.exit_code(), 13);
    assert_eq!(session.termination_reason(), TerminationReason::Exit);
}

#[tokio::test]
async fn bad_cmd() {
    let session = Subprocess::new(Command::new("/nonexistent/procpipe-test"));
    match session.start(None, OutputOptions::STDOUT) {
        Err(Error::Spawn { source, .. }) => assert_eq!(source.kind(), ErrorKind::NotFound),
        other => panic!("expected spawn error, got {other:?}"),
    }
    assert!(matches!(session.state(), ProcessState::Failed(ErrorKind::NotFound)));
    assert_eq!(session.phase(), SessionPhase::Completed);
}

#[tokio::test]
async fn reject_empty_argv() {
    let session = Subprocess::new(Command::from_argv(Vec::<String>::new()));
    match session.start(None, OutputOptions::NONE) {
        Err(Error::Spawn { source, .. }) => assert_eq!(source.kind(), ErrorKind::InvalidInput),
        other => panic!("expected spawn error, got {other:?}"),
    }
}

#[tokio::test]
async fn start_twice() {
    let session = Subprocess::new(Command::new("true"));
    let started = session.start(None, OutputOptions::NONE).unwrap();
    assert!(matches!(
        session.start(None, OutputOptions::NONE),
        Err(Error::AlreadyStarted)
    ));
    started.completion.await.unwrap();
}

#[tokio::test]
async fn echo_stdin() {
    let session = Subprocess::new(Command::new("cat"));
    let Started {
        stdout,
        stderr,
        completion,
    } = session
        .start(Some(Input::text("hello")), OutputOptions::COMBINED)
        .unwrap();
    let (out, err, status) = tokio::join!(stdout.bytes(), stderr.bytes(), completion.wait());
    assert_eq!(out, b"hello");
    assert!(err.is_empty());
    let status = status.unwrap();
    assert_eq!(status.code, 0);
    assert_eq!(status.reason, TerminationReason::Exit);
}

#[tokio::test]
async fn stdout_and_stderr_are_separate() {
    let session = Subprocess::new(Command::shell("printf foo; printf bar >&2"));
    let Started {
        stdout,
        stderr,
        completion,
    } = session.start(None, OutputOptions::COMBINED).unwrap();
    completion.await.unwrap();
    // buffered, so reading after completion loses nothing
    assert_eq!(stdout.string().await, "foo");
    assert_eq!(stderr.string().await, "bar");
}

#[tokio::test]
async fn large_output_read_slowly() {
    let session = Subprocess::new(Command::from_argv(["head", "-c", "10485760", "/dev/zero"]));
    let Started {
        mut stdout,
        completion,
        ..
    } = session.start(None, OutputOptions::STDOUT).unwrap();
    let reader = async {
        let mut total = 0;
        while let Some(chunk) = stdout.next().await {
            assert!(chunk.iter().all(|&b| b == 0));
            total += chunk.len();
            if total < 1 << 20 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        total
    };
    let (total, status) = tokio::join!(reader, completion.wait());
    assert!(status.unwrap().success());
    assert_eq!(total, 10 * 1024 * 1024);
}

#[tokio::test]
async fn discarded_output_does_not_block() {
    let session = Subprocess::new(Command::shell(
        "head -c 1048576 /dev/zero; head -c 1048576 /dev/zero >&2",
    ));
    let Started {
        stdout,
        stderr,
        completion,
    } = session.start(None, OutputOptions::NONE).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), completion)
        .await
        .expect("process blocked on a discarded stream")
        .unwrap();
    assert!(status.success());
    assert!(stdout.bytes().await.is_empty());
    assert!(stderr.bytes().await.is_empty());
}

#[tokio::test]
async fn large_input_and_output_concurrently() {
    let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    let session = Subprocess::new(Command::new("cat"));
    let Started {
        stdout, completion, ..
    } = session
        .start(Some(Input::bytes(data.clone())), OutputOptions::STDOUT)
        .unwrap();
    let (out, status) = tokio::join!(stdout.bytes(), completion.wait());
    assert!(status.unwrap().success());
    assert_eq!(out, data);
}

#[tokio::test]
async fn all_input_kinds_feed_the_same_bytes() {
    let tmpdir = TempDir::new().unwrap();
    let path = tmpdir.path().join("input");
    std::fs::write(&path, "one\ntwo\n").unwrap();

    let chunks: Vec<std::io::Result<Bytes>> =
        vec![Ok(Bytes::from_static(b"one\n")), Ok(Bytes::from_static(b"two\n"))];
    let inputs = vec![
        Input::bytes(&b"one\ntwo\n"[..]),
        Input::text("one\ntwo\n"),
        Input::file(&path),
        Input::stream(futures::stream::iter(chunks)),
    ];
    for input in inputs {
        let session = Subprocess::new(Command::new("cat"));
        let Started {
            stdout, completion, ..
        } = session.start(Some(input), OutputOptions::STDOUT).unwrap();
        let (out, status) = tokio::join!(stdout.string(), completion.wait());
        status.unwrap();
        assert_eq!(out, "one\ntwo\n");
    }
}

#[tokio::test]
async fn utf16_input() {
    let session = Subprocess::new(Command::from_argv(["od", "-An", "-tx1"]));
    let Started {
        stdout, completion, ..
    } = session
        .start(
            Some(Input::text_with_encoding("hi", crate::Encoding::Utf16Le)),
            OutputOptions::STDOUT,
        )
        .unwrap();
    let (out, status) = tokio::join!(stdout.string(), completion.wait());
    status.unwrap();
    assert_eq!(out.split_whitespace().collect::<Vec<_>>(), ["68", "00", "69", "00"]);
}

#[tokio::test]
async fn encoding_error_prevents_spawn() {
    let session = Subprocess::new(Command::new("cat"));
    let result = session.start(
        Some(Input::text_with_encoding("€", crate::Encoding::Latin1)),
        OutputOptions::STDOUT,
    );
    assert!(matches!(result, Err(Error::InputEncoding(_))));
    assert_eq!(session.state(), ProcessState::NotStarted);
    assert_eq!(session.pid(), None);
}

#[tokio::test]
async fn child_ignoring_stdin() {
    // The child exits without reading; the broken pipe must not fail the session.
    let data = vec![b'x'; 4 * 1024 * 1024];
    let session = Subprocess::new(Command::new("true"));
    let Started { completion, .. } = session
        .start(Some(Input::bytes(data)), OutputOptions::NONE)
        .unwrap();
    assert!(completion.await.unwrap().success());
}

#[tokio::test]
async fn failing_input_stream_closes_stdin() {
    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(b"partial")),
        Err(std::io::Error::other("source failed")),
    ];
    let session = Subprocess::new(Command::new("cat"));
    let Started {
        stdout, completion, ..
    } = session
        .start(
            Some(Input::stream(futures::stream::iter(chunks))),
            OutputOptions::STDOUT,
        )
        .unwrap();
    let (out, status) = tokio::join!(stdout.string(), completion.wait());
    assert!(status.unwrap().success());
    assert_eq!(out, "partial");
}

#[tokio::test]
async fn environment_is_replaced() {
    let session = Subprocess::new(Command::new("/usr/bin/env").env("PROCPIPE_TEST", "1"));
    let Started {
        stdout, completion, ..
    } = session.start(None, OutputOptions::STDOUT).unwrap();
    let (out, status) = tokio::join!(stdout.string(), completion.wait());
    status.unwrap();
    assert_eq!(out, "PROCPIPE_TEST=1\n");
}

#[tokio::test]
async fn callbacks_receive_all_output() {
    let out = Arc::new(Mutex::new(Vec::new()));
    let err = Arc::new(Mutex::new(Vec::new()));
    let handlers = OutputHandlers::new()
        .stdout({
            let out = Arc::clone(&out);
            move |chunk: Bytes| out.lock().unwrap().extend_from_slice(&chunk)
        })
        .stderr({
            let err = Arc::clone(&err);
            move |chunk: Bytes| err.lock().unwrap().extend_from_slice(&chunk)
        });
    let session = Subprocess::new(Command::shell("printf out; printf err >&2"));
    let completion = session.launch(None, handlers).unwrap();
    assert!(completion.await.unwrap().success());
    assert_eq!(*out.lock().unwrap(), b"out");
    assert_eq!(*err.lock().unwrap(), b"err");
}

#[tokio::test]
async fn terminate_running_process() {
    let session = Subprocess::new(Command::from_argv(["sleep", "5"]));
    let Started { completion, .. } = session.start(None, OutputOptions::NONE).unwrap();
    assert!(session.is_running());
    session.terminate();
    let status = completion.await.unwrap();
    assert_eq!(status, Termination::signaled(libc::SIGTERM));
    assert_eq!(session.termination_reason(), TerminationReason::UncaughtSignal);
    // no-op once exited
    session.terminate();
    assert!(!session.suspend());
    assert!(!session.resume());
}

#[tokio::test]
async fn suspend_and_resume() {
    let session = Subprocess::new(Command::from_argv(["sleep", "0.2"]));
    let Started { completion, .. } = session.start(None, OutputOptions::NONE).unwrap();
    assert!(session.suspend());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(session.is_running());
    assert!(session.resume());
    assert!(completion.await.unwrap().success());
}

#[tokio::test]
async fn dropping_completion_terminates() {
    let session = Subprocess::new(Command::from_argv(["sleep", "5"]));
    let Started { completion, .. } = session.start(None, OutputOptions::NONE).unwrap();
    let timed_out = tokio::time::timeout(Duration::from_millis(100), completion).await;
    assert!(timed_out.is_err());
    wait_until_stopped(&session).await;
    assert_eq!(session.exit_code(), libc::SIGTERM);
}

#[tokio::test]
async fn wait_or_cancel_reports_cancellation() {
    let session = Subprocess::new(Command::from_argv(["sleep", "5"]));
    let Started { completion, .. } = session.start(None, OutputOptions::NONE).unwrap();
    let result = completion
        .wait_or_cancel(tokio::time::sleep(Duration::from_millis(50)))
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));
    wait_until_stopped(&session).await;
    assert_eq!(session.termination_reason(), TerminationReason::UncaughtSignal);
    wait_until_completed(&session).await;
}

#[tokio::test]
async fn dropped_completion_still_completes() {
    let session = Subprocess::new(Command::from_argv(["sleep", "5"]));
    let Started { completion, .. } = session.start(None, OutputOptions::NONE).unwrap();
    drop(completion);
    wait_until_completed(&session).await;
    assert_eq!(session.termination_reason(), TerminationReason::UncaughtSignal);
}

#[tokio::test]
async fn stalled_input_stream_does_not_block_completion() {
    let session = Subprocess::new(Command::new("true"));
    let input = Input::stream(futures::stream::pending::<std::io::Result<Bytes>>());
    let Started { completion, .. } = session.start(Some(input), OutputOptions::NONE).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), completion.wait())
        .await
        .expect("completion blocked on stdin feed")
        .unwrap();
    assert_eq!(status, Termination::exited(0));
    assert_eq!(session.phase(), SessionPhase::Completed);
}

#[test]
fn launch_outside_runtime_fails_cleanly() {
    let session = Subprocess::new(Command::from_argv(["sleep", "5"]));
    match session.start(None, OutputOptions::STDOUT) {
        Err(Error::Spawn { source, .. }) => assert_eq!(source.kind(), ErrorKind::Other),
        other => panic!("expected spawn error, got {other:?}"),
    }
    assert_eq!(session.pid(), None);
    assert_eq!(session.phase(), SessionPhase::Completed);
}

#[tokio::test]
async fn output_arrives_before_completion() {
    let session = Subprocess::new(Command::shell("printf 'a\\nb\\n'; sleep 0.1; printf c"));
    let Started {
        stdout, completion, ..
    } = session.start(None, OutputOptions::STDOUT).unwrap();
    let lines = tokio::spawn(stdout.lines().collect::<Vec<String>>());
    completion.await.unwrap();
    assert_eq!(lines.await.unwrap(), ["a", "b", "c"]);
}
