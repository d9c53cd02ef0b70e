//! Container isolation via the Docker API.
//!
//! Every execution gets a fresh container with no network, a memory cap,
//! a CPU share cap, a pids limit, a read-only root filesystem and a small
//! tmpfs scratch area. The container is force-removed on every exit path,
//! including when the execution future is dropped. Daemon calls share one
//! deadline with the run itself, so a hung daemon cannot block the caller.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, WaitContainerOptions,
};
use bollard::service::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::capture::BoundedOutput;
use super::{
    BackendKind, ExecutionLimits, ExecutionOutcome, FailureKind, IsolationBackend, SandboxError,
};
use crate::artifact::Artifact;
use crate::config::DockerConfig;

/// Name prefix of every container this backend creates.
const CONTAINER_PREFIX: &str = "sandloop-";

/// Allowance on top of the execution timeout for daemon round trips.
const DAEMON_ALLOWANCE: Duration = Duration::from_secs(10);

/// Runs artifacts inside disposable containers.
pub(crate) struct ContainerBackend {
    config: DockerConfig,
}

struct ContainerRun {
    exit_code: i64,
    stdout: BoundedOutput,
    stderr: BoundedOutput,
}

/// Force-removes its container when dropped.
struct ContainerGuard {
    docker: Docker,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: &Docker, name: &str) -> Self {
        Self {
            docker: docker.clone(),
            name: name.to_string(),
            armed: true,
        }
    }

    async fn remove(mut self) {
        self.armed = false;
        remove_container(&self.docker, &self.name).await;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let docker = self.docker.clone();
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { remove_container(&docker, &name).await });
            }
            Err(_) => warn!("No runtime to remove container {}", name),
        }
    }
}

async fn remove_container(docker: &Docker, name: &str) {
    debug!("Removing container: {}", name);
    if let Err(e) = docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
    {
        warn!("Failed to remove container {}: {}", name, e);
    }
}

impl ContainerBackend {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Docker, SandboxError> {
        let docker = match self.config.docker_host.as_deref() {
            Some(host) => Docker::connect_with_socket(host, 120, bollard::API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| SandboxError::docker_unavailable(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| SandboxError::docker_unavailable(format!("cannot ping daemon: {e}")))?;

        Ok(docker)
    }

    /// The whole run, daemon calls included, under one deadline.
    async fn run(
        &self,
        artifact: &Artifact,
        limits: &ExecutionLimits,
    ) -> Result<ContainerRun, SandboxError> {
        let budget = limits.timeout + DAEMON_ALLOWANCE;
        match tokio::time::timeout(budget, self.run_unbounded(artifact, limits)).await {
            Ok(result) => result,
            Err(_) => Err(SandboxError::docker_unavailable(format!(
                "daemon did not finish the run within {budget:?}"
            ))),
        }
    }

    async fn run_unbounded(
        &self,
        artifact: &Artifact,
        limits: &ExecutionLimits,
    ) -> Result<ContainerRun, SandboxError> {
        let docker = self.connect().await?;

        if docker.inspect_image(&self.config.image).await.is_err() {
            return Err(SandboxError::image_not_found(&self.config.image));
        }

        let short_id = uuid::Uuid::new_v4().simple().to_string();
        let container_name = format!("{CONTAINER_PREFIX}{}", &short_id[..8]);

        debug!("Creating container: {}", container_name);
        docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                self.build_container_config(artifact.source(), limits),
            )
            .await
            .map_err(|e| SandboxError::container_failed(format!("create: {e}")))?;
        let guard = ContainerGuard::new(&docker, &container_name);

        let result = self.run_container(&docker, &container_name, limits).await;
        guard.remove().await;
        result
    }

    async fn run_container(
        &self,
        docker: &Docker,
        name: &str,
        limits: &ExecutionLimits,
    ) -> Result<ContainerRun, SandboxError> {
        docker
            .start_container::<String>(name, None)
            .await
            .map_err(|e| SandboxError::container_failed(format!("start: {e}")))?;

        let wait = async {
            let mut stream = std::pin::pin!(
                docker.wait_container(name, None::<WaitContainerOptions<String>>)
            );
            match stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // Non-zero exits arrive as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(e)) => Err(SandboxError::container_failed(format!("wait: {e}"))),
                None => Err(SandboxError::container_failed("wait stream ended early")),
            }
        };

        let exit_code = if let Ok(code) = tokio::time::timeout(limits.timeout, wait).await {
            code?
        } else {
            warn!("Container {} exceeded {:?}, killing", name, limits.timeout);
            if let Err(e) = docker
                .kill_container(name, None::<KillContainerOptions<String>>)
                .await
            {
                debug!("Kill failed (container may already be gone): {}", e);
            }
            return Err(SandboxError::timeout(limits.timeout));
        };

        let mut stdout = BoundedOutput::new(limits.max_output_bytes);
        let mut stderr = BoundedOutput::new(limits.max_output_bytes);
        let mut logs = std::pin::pin!(docker.logs(
            name,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        ));
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                Ok(_) => {}
                Err(e) => {
                    warn!("Error reading container logs: {}", e);
                    break;
                }
            }
        }

        info!("Container {} exited with code {}", name, exit_code);
        Ok(ContainerRun {
            exit_code,
            stdout,
            stderr,
        })
    }

    fn build_container_config(
        &self,
        source: &str,
        limits: &ExecutionLimits,
    ) -> ContainerConfig<String> {
        let memory = i64::try_from(limits.memory_bytes()).unwrap_or(i64::MAX);
        #[allow(clippy::cast_possible_truncation)]
        let nano_cpus = (self.config.cpus * 1_000_000_000.0) as i64;

        let mut tmpfs = HashMap::new();
        tmpfs.insert("/tmp".to_string(), format!("size={}", self.config.tmpfs_size));

        ContainerConfig {
            image: Some(self.config.image.clone()),
            cmd: Some(vec![
                self.config.interpreter.clone(),
                "-c".to_string(),
                source.to_string(),
            ]),
            working_dir: Some("/tmp".to_string()),
            network_disabled: Some(true),
            env: Some(vec![
                "HOME=/tmp".to_string(),
                "PYTHONDONTWRITEBYTECODE=1".to_string(),
            ]),
            host_config: Some(HostConfig {
                network_mode: Some("none".to_string()),
                memory: Some(memory),
                memory_swap: Some(memory),
                nano_cpus: Some(nano_cpus),
                pids_limit: Some(self.config.pids_limit),
                readonly_rootfs: Some(true),
                tmpfs: Some(tmpfs),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl IsolationBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn execute(&self, artifact: &Artifact, limits: &ExecutionLimits) -> ExecutionOutcome {
        let started = Instant::now();
        let result = self.run(artifact, limits).await;
        let elapsed = started.elapsed();

        match result {
            Ok(run) => {
                let (stdout, truncated) = run.stdout.finish();
                let outcome = if run.exit_code == 0 {
                    ExecutionOutcome::passed(BackendKind::Container, String::new(), elapsed)
                } else {
                    let (stderr, _) = run.stderr.finish();
                    let message = if stderr.trim().is_empty() {
                        format!("Container exited with code {}", run.exit_code)
                    } else {
                        stderr
                    };
                    ExecutionOutcome::failed(
                        BackendKind::Container,
                        FailureKind::RuntimeFailure,
                        message,
                        elapsed,
                    )
                };
                outcome
                    .with_stdout(stdout, truncated)
                    .with_exit_code(Some(run.exit_code))
            }
            Err(e) => {
                if e.is_unavailable() {
                    warn!("Container backend unavailable: {}", e);
                }
                e.into_outcome(BackendKind::Container, elapsed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> ContainerBackend {
        ContainerBackend::new(DockerConfig::default())
    }

    /// Daemon reachable and the default image present locally.
    async fn docker_ready() -> bool {
        let Ok(docker) = Docker::connect_with_local_defaults() else {
            return false;
        };
        docker.ping().await.is_ok()
            && docker
                .inspect_image(&DockerConfig::default().image)
                .await
                .is_ok()
    }

    async fn sandloop_containers() -> Vec<String> {
        use bollard::container::ListContainersOptions;

        let Ok(docker) = Docker::connect_with_local_defaults() else {
            return Vec::new();
        };
        let filters = HashMap::from([("name".to_string(), vec![CONTAINER_PREFIX.to_string()])]);
        docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .unwrap_or_default()
            .into_iter()
            .flat_map(|c| c.names.unwrap_or_default())
            .collect()
    }

    async fn wait_for_no_containers() -> Vec<String> {
        let mut left = sandloop_containers().await;
        for _ in 0..50 {
            if left.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            left = sandloop_containers().await;
        }
        left
    }

    #[test]
    fn test_container_config_isolation_flags() {
        let limits = ExecutionLimits::for_tests();
        let config = backend().build_container_config("print(1)", &limits);
        let host = config.host_config.unwrap();

        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, Some(64 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(50));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(
            host.tmpfs.unwrap().get("/tmp").map(String::as_str),
            Some("size=10m")
        );
        assert_eq!(config.network_disabled, Some(true));
    }

    #[test]
    fn test_container_config_passes_source_as_argument() {
        let limits = ExecutionLimits::for_tests();
        let config = backend().build_container_config("print('hi')", &limits);
        assert_eq!(
            config.cmd.unwrap(),
            vec!["python", "-c", "print('hi')"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(config.image.as_deref(), Some("python:3.11-slim"));
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_backend_unavailable() {
        let backend = ContainerBackend::new(DockerConfig {
            docker_host: Some("unix:///nonexistent/sandloop/docker.sock".to_string()),
            ..DockerConfig::default()
        });
        let outcome = backend
            .execute(&Artifact::from_source("print(1+1)"), &ExecutionLimits::for_tests())
            .await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.backend_used, BackendKind::Container);
        assert!(outcome.is_failure(FailureKind::BackendUnavailable));
        assert!(outcome
            .error_message
            .as_deref()
            .unwrap()
            .contains("Docker is not available"));
    }

    #[tokio::test]
    async fn test_container_runs_times_out_and_leaves_nothing_behind() {
        if !docker_ready().await {
            eprintln!("docker or {} not available, skipping", DockerConfig::default().image);
            return;
        }
        let backend = backend();

        let outcome = backend
            .execute(&Artifact::from_source("print(1+1)"), &ExecutionLimits::for_tests())
            .await;
        assert!(outcome.succeeded, "{outcome:?}");
        assert!(outcome.stdout.contains('2'));
        assert_eq!(outcome.backend_used, BackendKind::Container);

        let mut limits = ExecutionLimits::for_tests();
        limits.timeout = Duration::from_secs(2);
        let forever = Artifact::from_source("import time\nwhile True:\n    time.sleep(0.1)\n");
        let outcome = backend.execute(&forever, &limits).await;
        assert!(outcome.is_failure(FailureKind::TimeoutExceeded), "{outcome:?}");
        assert!(outcome.elapsed >= limits.timeout);
        assert_eq!(wait_for_no_containers().await, Vec::<String>::new());

        // dropping the execution mid-run still removes the container
        limits.timeout = Duration::from_secs(30);
        let dropped =
            tokio::time::timeout(Duration::from_secs(3), backend.execute(&forever, &limits)).await;
        assert!(dropped.is_err());
        assert_eq!(wait_for_no_containers().await, Vec::<String>::new());
    }
}
