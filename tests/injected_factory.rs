use std::sync::Arc;

use procpipe::mock::MockFactory;
use procpipe::{Command, Error, Input, ProcessFactory, Runner};

/// A small piece of "application code" that shells out.
struct Repo {
    runner: Runner,
}

impl Repo {
    fn new(factory: Arc<dyn ProcessFactory>) -> Repo {
        Repo {
            runner: Runner::with_factory(factory),
        }
    }

    async fn current_branch(&self) -> procpipe::Result<String> {
        let cmd = Command::from_argv(["git", "rev-parse", "--abbrev-ref", "HEAD"]);
        Ok(self.runner.string(&cmd, None).await?.trim().to_string())
    }

    async fn commit(&self, message: &str) -> procpipe::Result<()> {
        let cmd = Command::from_argv(["git", "commit", "-F", "-"]);
        self.runner.capture(&cmd, Some(Input::text(message))).await?;
        Ok(())
    }
}

#[tokio::test]
async fn branch_name_is_trimmed() {
    let mocks = MockFactory::new();
    mocks.stub_output(["git", "rev-parse", "--abbrev-ref", "HEAD"], "main\n", "", 0);
    let repo = Repo::new(Arc::new(mocks.clone()));
    assert_eq!(repo.current_branch().await.unwrap(), "main");
}

#[tokio::test]
async fn commit_message_goes_to_stdin() {
    let mocks = MockFactory::new();
    mocks.expect(
        ["git", "commit", "-F", "-"],
        Some(Input::text("fix typo")),
        |process| async move {
            let message = process.read_stdin().await;
            assert_eq!(message, b"fix typo");
            process.exit(0);
        },
    );
    let repo = Repo::new(Arc::new(mocks.clone()));
    repo.commit("fix typo").await.unwrap();
    mocks.verify().unwrap();
}

#[tokio::test]
async fn failed_commit_reports_stderr() {
    let mocks = MockFactory::new();
    mocks.stub_output(["git", "commit", "-F", "-"], "", "nothing to commit\n", 1);
    let repo = Repo::new(Arc::new(mocks.clone()));
    let err = repo.commit("empty").await.unwrap_err();
    assert!(matches!(err, Error::NonZeroExit { status: 1, .. }));
    assert_eq!(err.stderr_str().unwrap(), "nothing to commit\n");
    assert_eq!(err.to_string(), "command failed: exit status 1 (exit)");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn system_factory_runs_real_processes() {
    let repo = Repo::new(procpipe::default_factory());
    // not a repository, or git missing: either way a structured error, never a hang
    let tmp = tempfile::TempDir::new().unwrap();
    std::env::set_current_dir(tmp.path()).unwrap();
    assert!(repo.current_branch().await.is_err());
}
