//! Sandboxed command execution.
//!
//! This module defines the execution contract shared by the two sandbox
//! backends: a Docker-based executor that runs commands in resource-capped
//! containers, and a native executor that falls back to direct child
//! processes when no container daemon is reachable.
//!
//! Both backends satisfy the same [`Executor`] trait: run a shell command
//! against a working tree, bounded by a timeout, and report the exit code
//! and captured streams. Infrastructure failures (image pull, container
//! creation) are folded into the outcome as a non-zero exit code with the
//! failure text on stderr; `execute` itself never fails.

pub mod docker;
pub mod native;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::Config;

pub use docker::DockerExecutor;
pub use native::NativeExecutor;

/// Fixed stderr marker for commands terminated by the timeout.
pub const TIMEOUT_MARKER: &str = "TIMEOUT";

/// Exit code reported for commands terminated by the timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported for infrastructure failures (pull, create, spawn).
pub const INFRA_EXIT_CODE: i32 = 125;

/// Maximum bytes retained per captured stream (tail-truncated).
pub const MAX_STREAM_BYTES: usize = 50_000;

/// Path at which the working tree is mounted inside a container.
pub const SANDBOX_WORKDIR: &str = "/workspace";

/// Result of executing a command in a sandbox.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Exit code (0 means success, 124 timeout, 125 infrastructure).
    pub exit_code: i32,
    /// Standard output, truncated to the last [`MAX_STREAM_BYTES`] bytes.
    pub stdout: String,
    /// Standard error, truncated to the last [`MAX_STREAM_BYTES`] bytes.
    pub stderr: String,
}

impl ExecOutcome {
    /// True when the command exited cleanly.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Outcome for a command killed by the timeout.
    pub fn timed_out() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: TIMEOUT_MARKER.to_string(),
        }
    }

    /// Outcome for an infrastructure failure, with the failure text on stderr.
    pub fn infra_failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: INFRA_EXIT_CODE,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    /// Combined stdout and stderr, in that order, for downstream log parsing.
    pub fn combined_log(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// An isolated command runner bound to a working tree.
///
/// Implementations must terminate the command when `timeout` expires and
/// report [`ExecOutcome::timed_out`], and must clean up any resources they
/// create (containers, processes) on every exit path.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `command` through a shell with `tree` as the working directory.
    ///
    /// `image` names the container image for containerized backends; the
    /// native backend ignores it.
    async fn execute(
        &self,
        image: &str,
        tree: &Path,
        command: &str,
        timeout: Duration,
    ) -> ExecOutcome;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Probe result for the container daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DockerStatus {
    /// Whether a daemon responded to a ping.
    pub available: bool,
    /// Daemon version string, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Number of containers known to the daemon, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<usize>,
    /// Connection or ping failure text, when unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probes the container daemon configured in `config`.
pub async fn docker_status(config: &Config) -> DockerStatus {
    match docker::connect(config.docker_host.as_deref()) {
        Ok(docker) => match docker.ping().await {
            Ok(_) => {
                let version = docker
                    .version()
                    .await
                    .ok()
                    .and_then(|v| v.version);
                let containers = docker
                    .list_containers::<String>(None)
                    .await
                    .ok()
                    .map(|c| c.len());
                DockerStatus {
                    available: true,
                    version,
                    containers,
                    error: None,
                }
            }
            Err(e) => DockerStatus {
                available: false,
                version: None,
                containers: None,
                error: Some(e.to_string()),
            },
        },
        Err(e) => DockerStatus {
            available: false,
            version: None,
            containers: None,
            error: Some(e.to_string()),
        },
    }
}

/// Builds the executor for one run: Docker when the daemon answers the
/// capability probe, otherwise the native fallback.
///
/// `run_id` scopes container names and labels so that concurrent runs never
/// collide and stale containers can be traced back to their run.
pub async fn executor_for_run(config: &Config, run_id: &str) -> Arc<dyn Executor> {
    if let Ok(docker) = docker::connect(config.docker_host.as_deref())
        && docker.ping().await.is_ok()
    {
        return Arc::new(DockerExecutor::new(docker, run_id));
    }
    tracing::warn!(run_id, "container daemon unreachable, using native executor");
    Arc::new(NativeExecutor::new())
}

/// Truncates a string to its last `max` bytes on a char boundary.
pub(crate) fn truncate_tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}
