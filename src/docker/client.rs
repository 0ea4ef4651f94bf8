//! Docker CLI client.
//!
//! All Docker interactions go through `DockerClient`, which provides
//! consistent timeout handling, error mapping to [`DockerError`], and a
//! single point where `Command::new("docker")` is constructed. The coupler
//! needs only a small surface: container inspection, daemon health, and the
//! event-stream subprocess.

use super::DockerError;
use async_trait::async_trait;
use std::process::{Output, Stdio};
use std::time::Duration;

/// Timeout for `docker inspect` calls from the loops.
pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin client over the `docker` binary.
///
/// Construct once and thread through the application; the struct is cheap
/// (zero-sized today).
#[derive(Debug, Clone, Default)]
pub struct DockerClient;

impl DockerClient {
    pub fn new() -> Self {
        DockerClient
    }

    /// Run a docker command with a timeout, returning raw Output.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("docker").args(args).output(),
        )
        .await;

        let cmd_str = format!("docker {}", args.join(" "));

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DockerError::exec_failed(cmd_str, e)),
            Err(_) => Err(DockerError::timeout(cmd_str, timeout)),
        }
    }

    /// Check if a container is running.
    pub async fn is_running(&self, container: &str, timeout: Duration) -> bool {
        let output = self
            .run(&["inspect", "-f", "{{.State.Running}}", container], timeout)
            .await;
        match output {
            Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).trim() == "true",
            _ => false,
        }
    }

    /// Container state string (`running`, `exited`, `paused`, ...).
    /// A container that doesn't exist surfaces as `CommandFailed`.
    pub async fn inspect_state(
        &self,
        container: &str,
        timeout: Duration,
    ) -> Result<String, DockerError> {
        let output = self
            .run(&["inspect", "-f", "{{.State.Status}}", container], timeout)
            .await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(DockerError::failed(
                format!("docker inspect {}", container),
                &output,
            ))
        }
    }

    /// Check if the Docker daemon is healthy.
    pub async fn daemon_healthy(&self, timeout: Duration) -> bool {
        match self
            .run(&["info", "--format", "{{.ServerVersion}}"], timeout)
            .await
        {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }

    /// Spawn `docker events` filtered to one container, emitting one JSON
    /// object per line on stdout. The child stays alive until killed or the
    /// daemon goes away; the caller owns reading and reaping it.
    pub fn spawn_events(
        &self,
        container: &str,
    ) -> Result<tokio::process::Child, DockerError> {
        let filter = format!("container={}", container);
        tokio::process::Command::new("docker")
            .args(["events", "--filter", &filter, "--format", "{{json .}}"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DockerError::exec_failed(format!("docker events --filter {}", filter), e))
    }
}

/// Seam for "is the container up right now?" so the poller can be driven by
/// a mock in tests.
#[async_trait]
pub trait ContainerStatus: Send + Sync {
    async fn is_running(&self) -> bool;
}

/// A named container checked through the Docker CLI.
pub struct DockerContainer {
    client: DockerClient,
    name: String,
}

impl DockerContainer {
    pub fn new(client: DockerClient, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }
}

#[async_trait]
impl ContainerStatus for DockerContainer {
    async fn is_running(&self) -> bool {
        self.client.is_running(&self.name, INSPECT_TIMEOUT).await
    }
}
