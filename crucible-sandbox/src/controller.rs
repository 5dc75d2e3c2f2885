//! Per-session container lifecycle against the local Docker engine.
//!
//! One controller is shared by every session in the process; the
//! session→container table lives in an injected [`ContainerRegistry`] so
//! the controller itself stays stateless apart from its engine connection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SandboxError;
use crate::mounts::MountSet;
use crate::registry::ContainerRegistry;
use crate::Result;

/// Fixed image tag for session sandboxes. Never pulled; absence is fatal.
pub const SANDBOX_IMAGE: &str = "claudesmith:latest";

/// Canonical container name prefix. Every container this controller
/// creates is named `claude-agent-<sessionId>`.
pub const CONTAINER_NAME_PREFIX: &str = "claude-agent-";

/// Composite timeout for container creation.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(120);

const MEMORY_LIMIT_BYTES: i64 = 4 * 1024 * 1024 * 1024;
const CPU_LIMIT_NANOS: i64 = 2_000_000_000;
const STOP_GRACE_SECONDS: i64 = 5;

/// Result of one exec inside a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; 124 means the exec timed out.
    pub exit_code: i64,
    pub execution_time_ms: u64,
}

/// One entry from a directory listing inside the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    /// `f` for regular files, `d` for directories.
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
    pub modified: f64,
}

/// A point-in-time view of a running container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub container_id: String,
    pub running: bool,
    /// Derived from two consecutive engine stats samples.
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
}

/// Manages creation, reuse, exec, file IO, inspection, and destruction of
/// session sandboxes.
#[derive(Clone)]
pub struct SandboxController {
    docker: Docker,
    registry: ContainerRegistry,
}

impl SandboxController {
    /// Connect to the local engine using its platform defaults.
    pub fn new(registry: ContainerRegistry) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::EngineUnavailable(e.to_string()))?;
        Ok(Self { docker, registry })
    }

    /// Build a controller over an existing engine connection.
    pub fn with_docker(docker: Docker, registry: ContainerRegistry) -> Self {
        Self { docker, registry }
    }

    /// The session→container table this controller maintains.
    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }

    /// Ping the engine.
    pub async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// Verify the sandbox image exists locally. Never pulls.
    pub async fn ensure_image(&self) -> Result<()> {
        self.docker
            .inspect_image(SANDBOX_IMAGE)
            .await
            .map_err(|_| SandboxError::ImageMissing(SANDBOX_IMAGE.to_string()))?;
        Ok(())
    }

    /// Create (or reuse) the container for a session.
    ///
    /// A mapped, running container is returned as-is. A mapped but stopped
    /// container is destroyed and recreated. An orphan container holding
    /// the canonical name is removed first. The whole operation is bounded
    /// by [`DEFAULT_CREATE_TIMEOUT`].
    pub async fn create(&self, session_id: &str, mounts: &MountSet) -> Result<String> {
        tokio::time::timeout(DEFAULT_CREATE_TIMEOUT, self.create_inner(session_id, mounts))
            .await
            .map_err(|_| SandboxError::InitTimeout(DEFAULT_CREATE_TIMEOUT.as_millis() as u64))?
    }

    async fn create_inner(&self, session_id: &str, mounts: &MountSet) -> Result<String> {
        if let Some(existing) = self.registry.get(session_id) {
            if self.is_running(&existing).await {
                debug!(session_id, container_id = %existing, "reusing running container");
                return Ok(existing);
            }
            debug!(session_id, container_id = %existing, "mapped container not running; recreating");
            self.destroy(&existing).await?;
        }

        let name = container_name(session_id);

        // A previous process may have left a container holding our name.
        if let Ok(orphan) = self.docker.inspect_container(&name, None).await {
            if let Some(id) = orphan.id {
                warn!(session_id, container_id = %id, "removing orphan container");
                let _ = self
                    .docker
                    .remove_container(
                        &id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await;
            }
        }

        self.ensure_image().await?;

        let config = Config {
            image: Some(SANDBOX_IMAGE.to_string()),
            // A long-lived shell keeps the container alive between execs.
            cmd: Some(vec!["/bin/bash".to_string()]),
            tty: Some(true),
            open_stdin: Some(true),
            working_dir: Some("/scratch".to_string()),
            host_config: Some(HostConfig {
                memory: Some(MEMORY_LIMIT_BYTES),
                memory_swap: Some(MEMORY_LIMIT_BYTES),
                nano_cpus: Some(CPU_LIMIT_NANOS),
                network_mode: Some("bridge".to_string()),
                auto_remove: Some(false),
                mounts: Some(mounts.mounts()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| SandboxError::Lifecycle(format!("create failed: {e}")))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::Lifecycle(format!("start failed: {e}")))?;

        self.registry.insert(session_id, &created.id);
        debug!(session_id, container_id = %created.id, "container created");
        Ok(created.id)
    }

    /// Run a command via `bash -c`, demultiplexing the engine's framed
    /// stdout/stderr stream. A timeout yields exit code 124 rather than an
    /// error.
    pub async fn exec(
        &self,
        container_id: &str,
        command: &str,
        cwd: &str,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let started = Instant::now();

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(vec!["bash".to_string(), "-c".to_string(), command.to_string()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(cwd.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let run = async {
            let mut stdout = String::new();
            let mut stderr = String::new();

            if let StartExecResults::Attached { mut output, .. } =
                self.docker.start_exec(&exec.id, None).await?
            {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(SandboxError::from(e)),
                    }
                }
            }

            let inspect = self.docker.inspect_exec(&exec.id).await?;
            Ok(ExecOutput {
                stdout,
                stderr,
                exit_code: inspect.exit_code.unwrap_or(-1),
                execution_time_ms: 0,
            })
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(mut result) => {
                if let Ok(ref mut output) = result {
                    output.execution_time_ms = started.elapsed().as_millis() as u64;
                }
                result
            }
            Err(_) => Ok(ExecOutput {
                stdout: String::new(),
                stderr: format!("command timed out after {} ms", timeout.as_millis()),
                exit_code: 124,
                execution_time_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Read a file from the container. Throws on non-zero exit.
    pub async fn read_file(&self, container_id: &str, path: &str) -> Result<String> {
        let output = self
            .exec(
                container_id,
                &format!("cat {}", sh_quote(path)),
                "/scratch",
                Duration::from_secs(30),
            )
            .await?;

        if output.exit_code != 0 {
            return Err(SandboxError::FileOp(format!(
                "cat '{path}' exited {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Write a file into the container.
    ///
    /// The parent directory is created first, then content is streamed
    /// through a heredoc whose delimiter is a fresh random token, so the
    /// content can never close the heredoc early and smuggle commands in.
    pub async fn write_file(&self, container_id: &str, path: &str, content: &str) -> Result<()> {
        let delimiter = fresh_delimiter(content);
        let dir = crate::path::dirname(path);

        let body = if content.ends_with('\n') || content.is_empty() {
            content.to_string()
        } else {
            format!("{content}\n")
        };
        let script = format!(
            "mkdir -p {dir} && cat > {path} << '{delimiter}'\n{body}{delimiter}\n",
            dir = sh_quote(&dir),
            path = sh_quote(path),
        );

        let output = self
            .exec(container_id, &script, "/scratch", Duration::from_secs(30))
            .await?;

        if output.exit_code != 0 {
            return Err(SandboxError::FileOp(format!(
                "write '{path}' exited {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    /// List the immediate entries of a directory inside the container.
    pub async fn list_files(&self, container_id: &str, dir: &str) -> Result<Vec<FileInfo>> {
        let command = format!(
            "find {} -maxdepth 1 -mindepth 1 -printf '{{\"name\":\"%f\",\"path\":\"%p\",\"type\":\"%y\",\"size\":%s,\"modified\":%T@}}\\n'",
            sh_quote(dir)
        );
        let output = self
            .exec(container_id, &command, "/scratch", Duration::from_secs(30))
            .await?;

        if output.exit_code != 0 {
            return Err(SandboxError::FileOp(format!(
                "list '{dir}' exited {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let mut entries = Vec::new();
        for line in output.stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<FileInfo>(line) {
                Ok(info) => entries.push(info),
                Err(e) => warn!(line, error = %e, "unparseable list entry"),
            }
        }
        Ok(entries)
    }

    /// Current status with a CPU percentage derived from two consecutive
    /// stats samples.
    pub async fn get_status(&self, container_id: &str) -> Result<ContainerStatus> {
        let running = self.is_running(container_id).await;

        let mut stream = Box::pin(self.docker.stats(
            container_id,
            Some(StatsOptions {
                stream: true,
                one_shot: false,
            }),
        ));

        // The first sample has empty precpu counters; the second carries
        // the delta we need.
        let _ = stream.next().await;
        let sample = match stream.next().await {
            Some(Ok(stats)) => stats,
            _ => {
                return Ok(ContainerStatus {
                    container_id: container_id.to_string(),
                    running,
                    cpu_percent: 0.0,
                    memory_usage_bytes: 0,
                    memory_limit_bytes: 0,
                })
            }
        };

        let cpu_delta = sample.cpu_stats.cpu_usage.total_usage as f64
            - sample.precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = sample.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - sample.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let online_cpus = sample.cpu_stats.online_cpus.unwrap_or(1) as f64;

        let cpu_percent = if system_delta > 0.0 && cpu_delta >= 0.0 {
            (cpu_delta / system_delta) * online_cpus * 100.0
        } else {
            0.0
        };

        Ok(ContainerStatus {
            container_id: container_id.to_string(),
            running,
            cpu_percent,
            memory_usage_bytes: sample.memory_stats.usage.unwrap_or(0),
            memory_limit_bytes: sample.memory_stats.limit.unwrap_or(0),
        })
    }

    /// Stop (with a grace period), remove, and unmap a container.
    pub async fn destroy(&self, container_id: &str) -> Result<()> {
        let _ = self
            .docker
            .stop_container(container_id, Some(StopContainerOptions { t: STOP_GRACE_SECONDS }))
            .await;

        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::Lifecycle(format!("remove failed: {e}")))?;

        self.registry.remove_by_container(container_id);
        Ok(())
    }

    /// Destroy the container mapped to a session, if any.
    pub async fn destroy_by_session(&self, session_id: &str) -> Result<()> {
        match self.registry.get(session_id) {
            Some(container_id) => self.destroy(&container_id).await,
            None => Err(SandboxError::UnknownSession(session_id.to_string())),
        }
    }

    /// Remove every container whose name carries the canonical prefix.
    pub async fn cleanup_all(&self) -> Result<usize> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![CONTAINER_NAME_PREFIX.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let mut removed = 0;
        for container in containers {
            if let Some(id) = container.id {
                if self
                    .docker
                    .remove_container(
                        &id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await
                    .is_ok()
                {
                    self.registry.remove_by_container(&id);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn is_running(&self, container_id: &str) -> bool {
        match self.docker.inspect_container(container_id, None).await {
            Ok(inspect) => inspect
                .state
                .and_then(|s| s.running)
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Canonical container name for a session.
pub fn container_name(session_id: &str) -> String {
    format!("{CONTAINER_NAME_PREFIX}{session_id}")
}

/// Single-quote a string for `bash -c`.
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Generate a heredoc delimiter guaranteed not to appear in the content.
fn fresh_delimiter(content: &str) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    loop {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let delimiter = format!("CRUCIBLE_EOF_{token}");
        if !content.contains(&delimiter) {
            return delimiter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name() {
        assert_eq!(container_name("abc-123"), "claude-agent-abc-123");
    }

    #[test]
    fn test_sh_quote_handles_quotes() {
        assert_eq!(sh_quote("/scratch/a b"), "'/scratch/a b'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_fresh_delimiter_never_in_content() {
        let content = "line1\nCRUCIBLE_EOF_not_really\nline3";
        let delimiter = fresh_delimiter(content);
        assert!(!content.contains(&delimiter));
        assert!(delimiter.starts_with("CRUCIBLE_EOF_"));
    }

    #[test]
    fn test_fresh_delimiters_are_unique_per_call() {
        let a = fresh_delimiter("");
        let b = fresh_delimiter("");
        assert_ne!(a, b);
    }

    #[test]
    fn test_exec_output_roundtrips_through_json() {
        let output = ExecOutput {
            stdout: "ok".into(),
            stderr: String::new(),
            exit_code: 0,
            execution_time_ms: 12,
        };
        let json = serde_json::to_string(&output).unwrap();
        let back: ExecOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back.exit_code, 0);
        assert_eq!(back.stdout, "ok");
    }

    #[test]
    fn test_file_info_parses_find_printf_line() {
        let line = r#"{"name":"a.txt","path":"/scratch/a.txt","type":"f","size":12,"modified":1719243040.5}"#;
        let info: FileInfo = serde_json::from_str(line).unwrap();
        assert_eq!(info.name, "a.txt");
        assert_eq!(info.kind, "f");
        assert_eq!(info.size, 12);
    }
}
