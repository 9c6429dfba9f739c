//! Container runtime boundary.
//!
//! The lifecycle manager only talks to [`ContainerRuntime`];
//! [`ComposeRuntime`] implements it by shelling out to the docker CLI.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Everything the runtime needs to address one worker instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Compose project name.
    pub project: String,
    /// Rendered instance definition.
    pub compose_file: PathBuf,
    pub container_name: String,
}

/// Observed state of a worker container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Exited,
    Dead,
    /// No such container.
    Missing,
    Other(String),
}

impl ContainerState {
    /// Parse docker's `.State.Status` value.
    pub fn from_docker(status: &str) -> Self {
        match status.trim() {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the instance may still become ready.
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Restarting)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Missing => write!(f, "missing"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("container {0} not found")]
    NotFound(String),
}

/// Starts, inspects and removes worker instances.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start the instance described by `spec` in the background.
    async fn up(&self, spec: &WorkerSpec) -> Result<(), RuntimeError>;

    /// Stop the instance and remove its volumes.
    async fn down(&self, spec: &WorkerSpec) -> Result<(), RuntimeError>;

    async fn status(&self, container: &str) -> Result<ContainerState, RuntimeError>;

    async fn exists(&self, container: &str) -> Result<bool, RuntimeError> {
        Ok(self.status(container).await? != ContainerState::Missing)
    }

    /// The last `tail` lines of the instance's output.
    async fn logs(&self, container: &str, tail: usize) -> Result<String, RuntimeError>;

    /// Copy `src` from inside the container to the local path `dest`.
    async fn copy_out(&self, container: &str, src: &str, dest: &Path) -> Result<(), RuntimeError>;
}

/// [`ContainerRuntime`] backed by `docker compose` and `docker`.
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    /// Compose invocation, e.g. `docker compose` or `docker-compose`.
    compose: Vec<String>,
    docker: String,
}

impl ComposeRuntime {
    pub fn new(compose_bin: &str, docker_bin: impl Into<String>) -> Self {
        let mut compose: Vec<String> = compose_bin.split_whitespace().map(String::from).collect();
        if compose.is_empty() {
            compose = vec!["docker".to_string(), "compose".to_string()];
        }
        Self {
            compose,
            docker: docker_bin.into(),
        }
    }

    fn compose_command(&self, spec: &WorkerSpec, action: &[&str]) -> (String, Vec<String>) {
        let mut args: Vec<String> = self.compose[1..].to_vec();
        args.extend([
            "-p".to_string(),
            spec.project.clone(),
            "-f".to_string(),
            spec.compose_file.display().to_string(),
        ]);
        args.extend(action.iter().map(|s| s.to_string()));
        (self.compose[0].clone(), args)
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Output, RuntimeError> {
        debug!(program, args = ?args, "Running container command");
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                program: program.to_string(),
                source,
            })
    }

    async fn run_checked(&self, program: &str, args: &[String]) -> Result<Output, RuntimeError> {
        let output = self.run(program, args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(failed(program, args, &output))
        }
    }
}

impl Default for ComposeRuntime {
    fn default() -> Self {
        Self::new("docker compose", "docker")
    }
}

fn failed(program: &str, args: &[String], output: &Output) -> RuntimeError {
    RuntimeError::Failed {
        command: format!("{} {}", program, args.join(" ")),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn is_missing(output: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    stderr.contains("no such") || stderr.contains("not found")
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn up(&self, spec: &WorkerSpec) -> Result<(), RuntimeError> {
        let (program, args) = self.compose_command(spec, &["up", "-d"]);
        self.run_checked(&program, &args).await.map(|_| ())
    }

    async fn down(&self, spec: &WorkerSpec) -> Result<(), RuntimeError> {
        let (program, args) = self.compose_command(spec, &["down", "-v"]);
        self.run_checked(&program, &args).await.map(|_| ())
    }

    async fn status(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        let args = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Status}}".to_string(),
            container.to_string(),
        ];
        let output = self.run(&self.docker, &args).await?;
        if output.status.success() {
            Ok(ContainerState::from_docker(&String::from_utf8_lossy(&output.stdout)))
        } else if is_missing(&output) {
            Ok(ContainerState::Missing)
        } else {
            Err(failed(&self.docker, &args, &output))
        }
    }

    async fn logs(&self, container: &str, tail: usize) -> Result<String, RuntimeError> {
        let args = vec![
            "logs".to_string(),
            "--tail".to_string(),
            tail.to_string(),
            container.to_string(),
        ];
        let output = self.run(&self.docker, &args).await?;
        if !output.status.success() {
            return Err(if is_missing(&output) {
                RuntimeError::NotFound(container.to_string())
            } else {
                failed(&self.docker, &args, &output)
            });
        }
        // The server logs to stdout, the image's entrypoint to stderr.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn copy_out(&self, container: &str, src: &str, dest: &Path) -> Result<(), RuntimeError> {
        let args = vec![
            "cp".to_string(),
            format!("{}:{}", container, src),
            dest.display().to_string(),
        ];
        self.run_checked(&self.docker, &args).await.map(|_| ())
    }
}
