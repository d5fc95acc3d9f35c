//! Container runtime management module.
//!
//! Provides an async interface to manage containers via Docker or Podman CLI.
//! The runtime is auto-detected or can be configured explicitly.

mod container;
mod error;

pub use container::{
    Container, ContainerConfig, ContainerRecord, ContainerState, parse_inspect_output,
    parse_ps_output, split_env_entry, validate_container_name, validate_image_name,
};
pub use error::{ContainerError, ContainerResult};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures::stream::{self, Select};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::io::ReaderStream;

/// Live log output of a container, stdout and stderr interleaved.
pub type LogStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime
    #[default]
    Docker,
    /// Podman runtime
    Podman,
}

impl RuntimeType {
    /// Get the default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }

    /// Whether this runtime requires SELinux volume labels (:Z suffix).
    pub fn needs_selinux_labels(&self) -> bool {
        match self {
            RuntimeType::Docker => false,
            RuntimeType::Podman => true,
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// Validate a container ID or name.
///
/// Container IDs are hex strings (12 or 64 chars for docker/podman).
/// Container names follow the same rules as container creation.
fn validate_container_id_or_name(id: &str) -> ContainerResult<()> {
    if id.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container ID or name cannot be empty".to_string(),
        ));
    }

    if id.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container ID or name exceeds maximum length".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !id.chars().all(valid_chars) || id.starts_with('-') || id.starts_with('.') {
        return Err(ContainerError::InvalidInput(format!(
            "container ID or name '{}' contains invalid characters",
            id
        )));
    }

    Ok(())
}

/// Container runtime abstraction for testability.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    async fn list_containers(&self, all: bool) -> ContainerResult<Vec<Container>>;
    /// Full record, or `None` when the runtime has no such container.
    async fn inspect_container(&self, id_or_name: &str) -> ContainerResult<Option<ContainerRecord>>;
    /// Create (but do not start) a container, returning its runtime ID.
    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String>;
    async fn start_container(&self, container_id: &str) -> ContainerResult<()>;
    async fn stop_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()>;
    async fn restart_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()>;
    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()>;
    async fn image_exists(&self, image: &str) -> ContainerResult<bool>;
    async fn pull_image(&self, image: &str) -> ContainerResult<()>;
    /// Follow the container's output, starting with the last `tail` lines.
    async fn stream_logs(&self, container_id: &str, tail: u32) -> ContainerResult<LogStream>;
}

/// Container runtime client for managing containers.
///
/// Supports both Docker and Podman with automatic detection.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    /// The runtime type (docker or podman)
    runtime_type: RuntimeType,
    /// Path to the container binary
    binary: String,
}

#[async_trait]
impl ContainerRuntimeApi for ContainerRuntime {
    async fn list_containers(&self, all: bool) -> ContainerResult<Vec<Container>> {
        self.list_containers(all).await
    }

    async fn inspect_container(&self, id_or_name: &str) -> ContainerResult<Option<ContainerRecord>> {
        self.inspect_container(id_or_name).await
    }

    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        self.create_container(config).await
    }

    async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        self.simple_command("start", &[], container_id).await
    }

    async fn stop_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        let timeout = timeout_seconds.map(|t| t.to_string());
        let flags: Vec<&str> = match timeout.as_deref() {
            Some(t) => vec!["-t", t],
            None => vec![],
        };
        self.simple_command("stop", &flags, container_id).await
    }

    async fn restart_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        let timeout = timeout_seconds.map(|t| t.to_string());
        let flags: Vec<&str> = match timeout.as_deref() {
            Some(t) => vec!["-t", t],
            None => vec![],
        };
        self.simple_command("restart", &flags, container_id).await
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()> {
        let flags: &[&str] = if force { &["-f"] } else { &[] };
        self.simple_command("rm", flags, container_id).await
    }

    async fn image_exists(&self, image: &str) -> ContainerResult<bool> {
        self.image_exists(image).await
    }

    async fn pull_image(&self, image: &str) -> ContainerResult<()> {
        self.pull_image(image).await
    }

    async fn stream_logs(&self, container_id: &str, tail: u32) -> ContainerResult<LogStream> {
        self.stream_logs(container_id, tail).await
    }
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime {
    /// Create a new container runtime with auto-detection.
    ///
    /// Prefers Docker, then falls back to Podman.
    pub fn new() -> Self {
        if Self::is_binary_available("docker") {
            Self::with_type(RuntimeType::Docker)
        } else if Self::is_binary_available("podman") {
            Self::with_type(RuntimeType::Podman)
        } else {
            // Fall back to docker, will fail at runtime
            Self::with_type(RuntimeType::Docker)
        }
    }

    /// Create a container runtime with a specific type.
    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    /// Create a container runtime with a custom binary path.
    pub fn with_binary(runtime_type: RuntimeType, binary: impl Into<String>) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
        }
    }

    /// Build from configuration: an explicit type and/or binary, or auto-detection.
    pub fn from_settings(runtime: Option<RuntimeType>, binary: Option<&str>) -> Self {
        match (runtime, binary) {
            (Some(rt), Some(binary)) => Self::with_binary(rt, binary),
            (Some(rt), None) => Self::with_type(rt),
            (None, _) => Self::new(),
        }
    }

    /// Get the runtime type.
    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    /// Check if a binary is available in PATH.
    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run the binary with `args`, returning stdout on success.
    async fn run(&self, command: &str, args: &[String]) -> ContainerResult<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn simple_command(
        &self,
        command: &str,
        flags: &[&str],
        container_id: &str,
    ) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;

        let mut args: Vec<String> = vec![command.to_string()];
        args.extend(flags.iter().map(|f| f.to_string()));
        args.push(container_id.to_string());

        self.run(command, &args).await.map(|_| ())
    }

    /// Check if the container runtime is available and working.
    pub async fn health_check(&self) -> ContainerResult<String> {
        self.run("version", &["version".to_string()]).await
    }

    /// Arguments for `create` from a validated config.
    fn create_args(&self, config: &ContainerConfig) -> Vec<String> {
        let mut owned_args: Vec<String> = vec!["create".to_string()];

        if let Some(ref name) = config.name {
            owned_args.push("--name".to_string());
            owned_args.push(name.clone());
        }

        if config.tty {
            owned_args.push("-t".to_string());
        }

        // Plain host:container binds get an SELinux label on podman; binds
        // carrying options are passed through untouched
        for bind in &config.binds {
            owned_args.push("-v".to_string());
            if self.runtime_type.needs_selinux_labels() && bind.split(':').count() == 2 {
                owned_args.push(format!("{}:Z", bind));
            } else {
                owned_args.push(bind.clone());
            }
        }

        for (key, value) in &config.env {
            owned_args.push("-e".to_string());
            owned_args.push(format!("{}={}", key, value));
        }

        for (key, value) in &config.labels {
            owned_args.push("--label".to_string());
            owned_args.push(format!("{}={}", key, value));
        }

        if let Some(ref workdir) = config.workdir {
            owned_args.push("-w".to_string());
            owned_args.push(workdir.clone());
        }

        owned_args.push(config.image.clone());
        owned_args.extend(config.command.iter().cloned());
        owned_args
    }

    /// Create a new container without starting it.
    ///
    /// The configuration is validated before creating the container to prevent
    /// injection attacks and ensure all inputs are well-formed.
    pub async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        config.validate()?;
        let args = self.create_args(config);
        let stdout = self.run("create", &args).await?;
        Ok(stdout.trim().to_string())
    }

    /// List containers.
    pub async fn list_containers(&self, all: bool) -> ContainerResult<Vec<Container>> {
        let mut args = vec!["ps".to_string(), "--format".to_string(), "json".to_string()];
        if all {
            args.push("-a".to_string());
        }
        let stdout = self.run("ps", &args).await?;
        parse_ps_output(&stdout)
    }

    /// Inspect a container by ID or name.
    ///
    /// Returns `Ok(None)` when the runtime reports no such container.
    pub async fn inspect_container(
        &self,
        id_or_name: &str,
    ) -> ContainerResult<Option<ContainerRecord>> {
        validate_container_id_or_name(id_or_name)?;

        let args = vec![
            "container".to_string(),
            "inspect".to_string(),
            id_or_name.to_string(),
        ];
        match self.run("inspect", &args).await {
            Ok(stdout) => parse_inspect_output(&stdout),
            Err(ContainerError::CommandFailed { message, .. })
                if message.to_ascii_lowercase().contains("no such") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Check if an image exists locally.
    ///
    /// Uses `image inspect`, which works for both Docker and Podman.
    pub async fn image_exists(&self, image: &str) -> ContainerResult<bool> {
        validate_image_name(image)?;

        let output = Command::new(&self.binary)
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "image inspect".to_string(),
                message: e.to_string(),
            })?;

        Ok(output.status.success())
    }

    /// Pull an image, waiting for the pull to finish.
    pub async fn pull_image(&self, image: &str) -> ContainerResult<()> {
        validate_image_name(image)?;
        self.run("pull", &["pull".to_string(), image.to_string()])
            .await
            .map(|_| ())
    }

    /// Spawn `logs --follow` and stream its stdout and stderr.
    ///
    /// The log process is killed when the returned stream is dropped.
    pub async fn stream_logs(&self, container_id: &str, tail: u32) -> ContainerResult<LogStream> {
        validate_container_id_or_name(container_id)?;

        let mut child = Command::new(&self.binary)
            .args(["logs", "--follow", "--tail", &tail.to_string(), container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ContainerError::CommandFailed {
                command: "logs".to_string(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| ContainerError::CommandFailed {
            command: "logs".to_string(),
            message: "stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ContainerError::CommandFailed {
            command: "logs".to_string(),
            message: "stderr not captured".to_string(),
        })?;

        Ok(Box::pin(ChildLogStream {
            _child: child,
            output: stream::select(ReaderStream::new(stdout), ReaderStream::new(stderr)),
        }))
    }
}

/// Merged output of a `logs --follow` process that owns the process.
struct ChildLogStream {
    _child: Child,
    output: Select<ReaderStream<ChildStdout>, ReaderStream<ChildStderr>>,
}

impl Stream for ChildLogStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.output).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_container_runtime_health_check() {
        let runtime = ContainerRuntime::new();
        // This test will only pass if docker or podman is installed
        if let Ok(version) = runtime.health_check().await {
            assert!(!version.is_empty());
        }
    }

    #[test]
    fn test_runtime_type_selinux() {
        assert!(!RuntimeType::Docker.needs_selinux_labels());
        assert!(RuntimeType::Podman.needs_selinux_labels());
    }

    #[test]
    fn test_validate_container_id_or_name() {
        assert!(validate_container_id_or_name("demo").is_ok());
        assert!(validate_container_id_or_name("4f2a9c1b7e0d").is_ok());
        assert!(validate_container_id_or_name("").is_err());
        assert!(validate_container_id_or_name("-rf").is_err());
        assert!(validate_container_id_or_name("a b").is_err());
        assert!(validate_container_id_or_name("a;b").is_err());
    }

    #[test]
    fn test_create_args() {
        let config = ContainerConfig::new("node:20")
            .name("demo")
            .tty(true)
            .volume("/opt/js-data/demo", "/home/container")
            .binds(vec!["/srv/cache:/cache:ro".to_string()])
            .env("STARTUP_CMD", "node run.js")
            .label("panel.kind", "js-panel")
            .workdir("/home/container")
            .command(vec!["bash".into(), "/home/container/entrypoint.sh".into()]);

        let docker = ContainerRuntime::with_type(RuntimeType::Docker).create_args(&config);
        assert_eq!(
            docker,
            vec![
                "create",
                "--name",
                "demo",
                "-t",
                "-v",
                "/opt/js-data/demo:/home/container",
                "-v",
                "/srv/cache:/cache:ro",
                "-e",
                "STARTUP_CMD=node run.js",
                "--label",
                "panel.kind=js-panel",
                "-w",
                "/home/container",
                "node:20",
                "bash",
                "/home/container/entrypoint.sh",
            ]
        );

        let podman = ContainerRuntime::with_type(RuntimeType::Podman).create_args(&config);
        assert!(podman.contains(&"/opt/js-data/demo:/home/container:Z".to_string()));
        assert!(podman.contains(&"/srv/cache:/cache:ro".to_string()));
    }
}
