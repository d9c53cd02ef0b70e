//! Operating-system subprocess isolation.
//!
//! The artifact is written into a fresh scratch directory and run by the
//! configured interpreter with a scrubbed environment:
//! ```text
//! PATH=<inherited> HOME=<scratch> PYTHONPATH= python3 main.py
//! ```
//! stdin is closed and stdout/stderr are captured up to the byte cap. The
//! child leads its own process group. Once the child exits or the deadline
//! passes, the whole group is killed, so forked descendants neither outlive
//! the call nor hold its output pipes open.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use super::capture::StreamCapture;
use super::{
    BackendKind, ExecutionLimits, ExecutionOutcome, FailureKind, IsolationBackend, SandboxError,
};
use crate::artifact::Artifact;
use crate::config::SubprocessConfig;

/// How long output readers may keep draining after the group is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Runs artifacts as child processes.
pub(crate) struct SubprocessBackend {
    config: SubprocessConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildExit {
    Exited(Option<i32>),
    TimedOut,
}

/// Raw result of a finished child.
struct ChildRun {
    exit: ChildExit,
    stdout: (String, bool),
    stderr: (String, bool),
}

impl SubprocessBackend {
    pub fn new(config: SubprocessConfig) -> Self {
        Self { config }
    }

    async fn run(&self, artifact: &Artifact, limits: &ExecutionLimits) -> Result<ChildRun, SandboxError> {
        let scratch = tempfile::Builder::new().prefix("sandloop-").tempdir()?;
        let script = scratch.path().join(&self.config.file_name);
        tokio::fs::write(&script, artifact.source()).await?;

        let program = &self.config.interpreter;
        debug!("Running {} {} in {}", program, script.display(), scratch.path().display());

        let mut cmd = Command::new(program);
        cmd.arg(&self.config.file_name)
            .current_dir(scratch.path())
            .env_clear()
            .env("HOME", scratch.path())
            .env("PYTHONPATH", "")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let deadline = tokio::time::Instant::now() + limits.timeout;
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::spawn_failed(program.clone(), &e))?;
        let group = child.id();

        let limit = limits.max_output_bytes;
        let stdout = child.stdout.take().map(|s| StreamCapture::spawn(s, limit));
        let stderr = child.stderr.take().map(|s| StreamCapture::spawn(s, limit));

        let waited = tokio::time::timeout_at(deadline, child.wait()).await;
        if let Some(pgid) = group {
            kill_process_group(pgid);
        }

        let exit = match waited {
            Ok(status) => ChildExit::Exited(status?.code()),
            Err(_) => {
                warn!("Subprocess exceeded {:?}, killing", limits.timeout);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed-out child: {}", e);
                }
                ChildExit::TimedOut
            }
        };

        Ok(ChildRun {
            exit,
            stdout: drain(stdout).await,
            stderr: drain(stderr).await,
        })
        // scratch dir is removed when `scratch` drops
    }
}

async fn drain(capture: Option<StreamCapture>) -> (String, bool) {
    match capture {
        Some(capture) => capture.finish_within(DRAIN_GRACE).await,
        None => (String::new(), false),
    }
}

/// SIGKILLs every process in the group led by the artifact.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // ESRCH: the group is already empty
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[async_trait]
impl IsolationBackend for SubprocessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    async fn execute(&self, artifact: &Artifact, limits: &ExecutionLimits) -> ExecutionOutcome {
        let started = Instant::now();
        let result = self.run(artifact, limits).await;
        let elapsed = started.elapsed();

        match result {
            Ok(run) => outcome_from_run(run, limits, elapsed),
            Err(e) => e.into_outcome(BackendKind::Subprocess, elapsed),
        }
    }
}

fn outcome_from_run(run: ChildRun, limits: &ExecutionLimits, elapsed: Duration) -> ExecutionOutcome {
    let (stdout, stdout_truncated) = run.stdout;
    let (stderr, _) = run.stderr;

    let exit_code = match run.exit {
        ChildExit::Exited(code) => code,
        ChildExit::TimedOut => {
            return ExecutionOutcome::timed_out(BackendKind::Subprocess, limits.timeout, elapsed)
                .with_stdout(stdout, stdout_truncated);
        }
    };

    let outcome = if exit_code == Some(0) {
        ExecutionOutcome::passed(BackendKind::Subprocess, String::new(), elapsed)
    } else {
        let message = if stderr.trim().is_empty() {
            match exit_code {
                Some(code) => format!("Process exited with code {code}"),
                None => "Process terminated by signal".to_string(),
            }
        } else {
            stderr
        };
        ExecutionOutcome::failed(
            BackendKind::Subprocess,
            FailureKind::RuntimeFailure,
            message,
            elapsed,
        )
    };

    outcome
        .with_stdout(stdout, stdout_truncated)
        .with_exit_code(exit_code.map(i64::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capture::TRUNCATION_MARKER;
    use crate::sandbox::OutcomeKind;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn backend() -> SubprocessBackend {
        SubprocessBackend::new(SubprocessConfig::default())
    }

    #[test]
    fn test_outcome_from_successful_run() {
        let run = ChildRun {
            exit: ChildExit::Exited(Some(0)),
            stdout: ("2\n".to_string(), false),
            stderr: (String::new(), false),
        };
        let outcome = outcome_from_run(run, &ExecutionLimits::for_tests(), Duration::from_millis(5));
        assert!(outcome.succeeded);
        assert_eq!(outcome.stdout, "2\n");
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[test]
    fn test_outcome_from_failed_run_uses_stderr() {
        let run = ChildRun {
            exit: ChildExit::Exited(Some(1)),
            stdout: (String::new(), false),
            stderr: ("ZeroDivisionError: division by zero\n".to_string(), false),
        };
        let outcome = outcome_from_run(run, &ExecutionLimits::for_tests(), Duration::ZERO);
        assert!(!outcome.succeeded);
        assert!(outcome.is_failure(FailureKind::RuntimeFailure));
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .contains("ZeroDivisionError"));
    }

    #[test]
    fn test_outcome_from_silent_failure() {
        let run = ChildRun {
            exit: ChildExit::Exited(Some(3)),
            stdout: (String::new(), false),
            stderr: (String::new(), false),
        };
        let outcome = outcome_from_run(run, &ExecutionLimits::for_tests(), Duration::ZERO);
        assert_eq!(
            outcome.error_message.as_deref(),
            Some("Process exited with code 3")
        );
    }

    #[test]
    fn test_outcome_from_timed_out_run_keeps_partial_output() {
        let run = ChildRun {
            exit: ChildExit::TimedOut,
            stdout: ("started\n".to_string(), false),
            stderr: (String::new(), false),
        };
        let limits = ExecutionLimits::for_tests();
        let outcome = outcome_from_run(run, &limits, limits.timeout);
        assert!(outcome.is_failure(FailureKind::TimeoutExceeded));
        assert_eq!(outcome.stdout, "started\n");
        assert_eq!(outcome.exit_code, None);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_unavailable() {
        let backend = SubprocessBackend::new(SubprocessConfig {
            interpreter: "definitely-not-an-interpreter-xyz".to_string(),
            ..SubprocessConfig::default()
        });
        let outcome = backend
            .execute(&Artifact::from_source("print(1)"), &ExecutionLimits::for_tests())
            .await;
        assert!(!outcome.succeeded);
        assert!(outcome.is_failure(FailureKind::BackendUnavailable));
        assert_eq!(outcome.backend_used, BackendKind::Subprocess);
    }

    #[tokio::test]
    async fn test_print_one_plus_one() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let outcome = backend()
            .execute(&Artifact::from_source("print(1+1)"), &ExecutionLimits::for_tests())
            .await;
        assert!(outcome.succeeded, "{outcome:?}");
        assert!(outcome.stdout.contains('2'));
        assert_eq!(outcome.kind, OutcomeKind::Passed);
    }

    #[tokio::test]
    async fn test_runtime_error_is_captured() {
        if !python_available() {
            return;
        }
        let outcome = backend()
            .execute(
                &Artifact::from_source("print('before')\n1/0\n"),
                &ExecutionLimits::for_tests(),
            )
            .await;
        assert!(!outcome.succeeded);
        assert!(outcome.stdout.contains("before"));
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        if !python_available() {
            return;
        }
        let mut limits = ExecutionLimits::for_tests();
        limits.timeout = Duration::from_millis(500);
        let outcome = backend()
            .execute(
                &Artifact::from_source("import time\nwhile True:\n    time.sleep(0.1)\n"),
                &limits,
            )
            .await;
        assert!(!outcome.succeeded);
        assert!(outcome.is_failure(FailureKind::TimeoutExceeded));
        assert!(outcome.elapsed >= limits.timeout);
        assert!(outcome.error_message.as_deref().unwrap().contains("timed out"));
    }

    /// Live (not zombie) process with this pid.
    #[cfg(target_os = "linux")]
    fn process_is_running(pid: u32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
            // state follows the parenthesised command name
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X")
        })
    }

    #[cfg(target_os = "linux")]
    async fn wait_until_gone(pid: u32) -> bool {
        for _ in 0..20 {
            if !process_is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[cfg(target_os = "linux")]
    const FORK_AND_PRINT_CHILD: &str = "import os, time\n\
        pid = os.fork()\n\
        if pid == 0:\n    time.sleep(20)\n    os._exit(0)\n\
        print(pid, flush=True)\n";

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_forked_descendant_does_not_hold_the_call_open() {
        if !python_available() {
            return;
        }
        let mut limits = ExecutionLimits::for_tests();
        limits.timeout = Duration::from_secs(2);

        let started = Instant::now();
        let outcome = backend()
            .execute(&Artifact::from_source(FORK_AND_PRINT_CHILD), &limits)
            .await;

        assert!(
            started.elapsed() < limits.timeout + Duration::from_secs(1),
            "returned after {:?}",
            started.elapsed()
        );
        assert!(outcome.succeeded, "{outcome:?}");
        let pid: u32 = outcome.stdout.trim().parse().unwrap();
        assert!(wait_until_gone(pid).await, "descendant {pid} still running");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_forked_descendants() {
        if !python_available() {
            return;
        }
        let mut limits = ExecutionLimits::for_tests();
        limits.timeout = Duration::from_secs(1);
        let source = format!("{FORK_AND_PRINT_CHILD}time.sleep(30)\n");

        let outcome = backend()
            .execute(&Artifact::from_source(&source), &limits)
            .await;

        assert!(outcome.is_failure(FailureKind::TimeoutExceeded), "{outcome:?}");
        assert!(outcome.elapsed < Duration::from_secs(5));
        let pid: u32 = outcome.stdout.trim().parse().unwrap();
        assert!(wait_until_gone(pid).await, "descendant {pid} still running");
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        if !python_available() {
            return;
        }
        let mut limits = ExecutionLimits::for_tests();
        limits.max_output_bytes = 100;
        let outcome = backend()
            .execute(&Artifact::from_source("print('x' * 5000)"), &limits)
            .await;
        assert!(outcome.succeeded);
        assert!(outcome.truncated);
        assert!(outcome.stdout.len() <= limits.max_output_bytes);
        assert!(outcome.stdout.ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_environment_is_scrubbed() {
        if !python_available() {
            return;
        }
        std::env::set_var("SANDLOOP_SECRET_FOR_TEST", "hunter2");
        let outcome = backend()
            .execute(
                &Artifact::from_source(
                    "import os\nprint(os.environ.get('SANDLOOP_SECRET_FOR_TEST', 'absent'))",
                ),
                &ExecutionLimits::for_tests(),
            )
            .await;
        assert!(outcome.succeeded, "{outcome:?}");
        assert!(outcome.stdout.contains("absent"));
    }

    #[tokio::test]
    async fn test_repeated_runs_are_identical() {
        if !python_available() {
            return;
        }
        let artifact = Artifact::from_source("print(sum(range(10)))");
        let limits = ExecutionLimits::for_tests();
        let a = backend().execute(&artifact, &limits).await;
        let b = backend().execute(&artifact, &limits).await;
        assert_eq!(a.succeeded, b.succeeded);
        assert_eq!(a.stdout, b.stdout);
    }
}
