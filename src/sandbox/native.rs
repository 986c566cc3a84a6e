//! Native process executor.
//!
//! Fallback used when no container daemon is reachable: commands run as
//! direct child processes in the working tree, with the same timeout and
//! stream-truncation behavior as the containerized backend. There is no
//! resource isolation beyond the timeout.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

use super::{ExecOutcome, Executor, MAX_STREAM_BYTES, truncate_tail};

/// Executor that runs commands as local child processes.
pub struct NativeExecutor {
    shell: String,
}

impl NativeExecutor {
    pub fn new() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl Default for NativeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for NativeExecutor {
    async fn execute(
        &self,
        _image: &str,
        tree: &Path,
        command: &str,
        timeout: Duration,
    ) -> ExecOutcome {
        let mut process = tokio::process::Command::new(&self.shell);
        process
            .arg("-c")
            .arg(command)
            .current_dir(tree)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match process.spawn() {
            Ok(child) => child,
            Err(e) => return ExecOutcome::infra_failure(format!("spawn failed: {e}")),
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecOutcome {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: truncate_tail(&String::from_utf8_lossy(&output.stdout), MAX_STREAM_BYTES),
                stderr: truncate_tail(&String::from_utf8_lossy(&output.stderr), MAX_STREAM_BYTES),
            },
            Ok(Err(e)) => ExecOutcome::infra_failure(format!("wait failed: {e}")),
            // kill_on_drop reaps the child when the future is dropped here.
            Err(_) => ExecOutcome::timed_out(),
        }
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tree() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let executor = NativeExecutor::new();
        let outcome = executor
            .execute("", &tree(), "echo out; echo err >&2; exit 3", Duration::from_secs(10))
            .await;
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let executor = NativeExecutor::new();
        let outcome = executor
            .execute("", &tree(), "true", Duration::from_secs(10))
            .await;
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn timeout_returns_fixed_marker() {
        let executor = NativeExecutor::new();
        let outcome = executor
            .execute("", &tree(), "sleep 5", Duration::from_millis(100))
            .await;
        assert_eq!(outcome.exit_code, 124);
        assert_eq!(outcome.stderr, crate::sandbox::TIMEOUT_MARKER);
    }

    #[tokio::test]
    async fn runs_in_the_given_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "present").unwrap();
        let executor = NativeExecutor::new();
        let outcome = executor
            .execute("", dir.path(), "cat marker.txt", Duration::from_secs(10))
            .await;
        assert_eq!(outcome.stdout, "present");
    }
}
