//! Container runtime collaborator: restart, status and log retrieval for a
//! named container. The production implementation drives the `docker` CLI.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container '{0}' not found")]
    NotFound(String),
    #[error("container runtime command failed: {0}")]
    CommandFailed(String),
    #[error("failed to invoke container runtime: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse view of a container's lifecycle state. Only `Exited` changes
/// gateway behavior (startup log capture); everything that is not running
/// and not exited collapses into `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Exited,
    Other(String),
}

impl ContainerStatus {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "running" => Self::Running,
            "exited" | "dead" => Self::Exited,
            other => Self::Other(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn restart(&self, name: &str) -> Result<(), RuntimeError>;
    async fn status(&self, name: &str) -> Result<ContainerStatus, RuntimeError>;
    async fn logs(&self, name: &str) -> Result<String, RuntimeError>;
}

/// Shells out to the `docker` binary. The gateway runs alongside the docker
/// daemon with the CLI on PATH, so this avoids carrying a daemon API client.
#[derive(Default)]
pub struct DockerCli;

impl DockerCli {
    async fn run(&self, name: &str, args: &[&str]) -> Result<String, RuntimeError> {
        let output = Command::new("docker").args(args).output().await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stderr.contains("No such container") {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        Err(RuntimeError::CommandFailed(stderr.trim().to_string()))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(name, &["restart", name]).await?;
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<ContainerStatus, RuntimeError> {
        let raw = self
            .run(name, &["inspect", "-f", "{{.State.Status}}", name])
            .await?;
        Ok(ContainerStatus::parse(&raw))
    }

    async fn logs(&self, name: &str) -> Result<String, RuntimeError> {
        // Captured backend output lands on both streams; docker multiplexes
        // them and the CLI re-splits, so take stdout and stderr together.
        let output = Command::new("docker").args(["logs", name]).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("No such container") {
                return Err(RuntimeError::NotFound(name.to_string()));
            }
            return Err(RuntimeError::CommandFailed(stderr.trim().to_string()));
        }
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_covers_docker_states() {
        assert_eq!(ContainerStatus::parse("running\n"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::parse("exited"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::parse("dead"), ContainerStatus::Exited);
        assert_eq!(
            ContainerStatus::parse("restarting"),
            ContainerStatus::Other("restarting".to_string())
        );
    }
}
