//! Docker container executor.
//!
//! Each command runs in its own short-lived container: the working tree is
//! bind-mounted read-write at [`SANDBOX_WORKDIR`], resource caps are applied
//! through the host config, and the container is force-removed on every exit
//! path, including timeout and infrastructure failure.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use futures::StreamExt;

use super::{
    ExecOutcome, Executor, MAX_STREAM_BYTES, SANDBOX_WORKDIR, truncate_tail,
};

/// Memory cap per sandbox container (512 MiB).
const MEMORY_LIMIT_BYTES: i64 = 512 * 1024 * 1024;

/// Memory+swap cap per sandbox container (1 GiB).
const MEMORY_SWAP_BYTES: i64 = 1024 * 1024 * 1024;

/// CPU cap per sandbox container (2 CPUs).
const NANO_CPUS: i64 = 2_000_000_000;

/// Label attached to every container so stale ones can be traced to a run.
const RUN_LABEL: &str = "mender.run";

/// Connects to the container daemon, over HTTP when a host is configured
/// and over the local default socket otherwise.
pub fn connect(host: Option<&str>) -> Result<Docker, bollard::errors::Error> {
    match host {
        Some(host) => Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION),
        None => Docker::connect_with_local_defaults(),
    }
}

/// Executor backed by per-command Docker containers.
pub struct DockerExecutor {
    docker: Docker,
    run_id: String,
}

impl DockerExecutor {
    /// Creates an executor scoped to `run_id`.
    pub fn new(docker: Docker, run_id: &str) -> Self {
        Self {
            docker,
            run_id: run_id.to_string(),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), bollard::errors::Error> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress?;
        }
        Ok(())
    }

    async fn create_container(
        &self,
        image: &str,
        tree: &Path,
        command: &str,
    ) -> Result<String, bollard::errors::Error> {
        let tree_abs = std::fs::canonicalize(tree).unwrap_or_else(|_| tree.to_path_buf());
        let host_config = bollard::models::HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                tree_abs.to_string_lossy(),
                SANDBOX_WORKDIR
            )]),
            memory: Some(MEMORY_LIMIT_BYTES),
            memory_swap: Some(MEMORY_SWAP_BYTES),
            nano_cpus: Some(NANO_CPUS),
            ..Default::default()
        };

        let labels = HashMap::from([(RUN_LABEL.to_string(), self.run_id.clone())]);

        let container_config = ContainerConfig {
            image: Some(image.to_string()),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                command.to_string(),
            ]),
            working_dir: Some(SANDBOX_WORKDIR.to_string()),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let name = format!("mender-{}-{}", self.run_id, uuid::Uuid::new_v4().simple());
        let options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await?;
        Ok(response.id)
    }

    /// Waits for the container and returns its exit code.
    ///
    /// bollard surfaces a non-zero exit either in the wait body or as a
    /// `DockerContainerWaitError`, depending on daemon version.
    async fn wait_exit_code(&self, container_id: &str) -> i32 {
        let mut wait = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions<String>>);
        match wait.next().await {
            Some(Ok(body)) => body.status_code as i32,
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                code as i32
            }
            Some(Err(_)) | None => -1,
        }
    }

    async fn collect_logs(&self, container_id: &str) -> (String, String) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut stream = self.docker.logs(container_id, Some(options));
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        (
            truncate_tail(&stdout, MAX_STREAM_BYTES),
            truncate_tail(&stderr, MAX_STREAM_BYTES),
        )
    }

    async fn remove_container(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(container_id, Some(options)).await {
            tracing::warn!(container_id, error = %e, "failed to remove sandbox container");
        }
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn execute(
        &self,
        image: &str,
        tree: &Path,
        command: &str,
        timeout: Duration,
    ) -> ExecOutcome {
        if let Err(e) = self.pull_image(image).await {
            return ExecOutcome::infra_failure(format!("image pull failed: {e}"));
        }

        let container_id = match self.create_container(image, tree, command).await {
            Ok(id) => id,
            Err(e) => {
                return ExecOutcome::infra_failure(format!("container creation failed: {e}"));
            }
        };

        if let Err(e) = self
            .docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
        {
            self.remove_container(&container_id).await;
            return ExecOutcome::infra_failure(format!("container start failed: {e}"));
        }

        let outcome =
            match tokio::time::timeout(timeout, self.wait_exit_code(&container_id)).await {
                Ok(exit_code) => {
                    let (stdout, stderr) = self.collect_logs(&container_id).await;
                    ExecOutcome {
                        exit_code,
                        stdout,
                        stderr,
                    }
                }
                Err(_) => ExecOutcome::timed_out(),
            };

        self.remove_container(&container_id).await;
        outcome
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}
