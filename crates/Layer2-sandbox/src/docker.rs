//! Docker runtime - isolation units as Docker containers via the Engine API

use crate::error::SandboxError;
use crate::runtime::{append_limited, CapturedOutput, IsolationRuntime, UnitHandle, UnitSpec};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Runs each unit as a fresh container. Containers are created with
/// `auto_remove = false` so output can still be read after exit; the
/// execution manager always calls `remove`.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn host_config(spec: &UnitSpec) -> HostConfig {
        let binds: Vec<String> = spec
            .mounts
            .iter()
            .map(|m| {
                format!(
                    "{}:{}{}",
                    m.host_path.display(),
                    m.container_path,
                    if m.read_only { ":ro" } else { "" }
                )
            })
            .collect();

        let tmpfs: HashMap<String, String> = spec.tmpfs.iter().cloned().collect();

        let mut security_opt = Vec::new();
        if spec.no_new_privileges {
            security_opt.push("no-new-privileges:true".to_string());
        }

        HostConfig {
            memory: Some(spec.memory_bytes),
            memory_swap: Some(spec.memory_bytes),
            nano_cpus: Some(spec.nano_cpus),
            pids_limit: Some(spec.pids_limit),
            readonly_rootfs: Some(spec.read_only_rootfs),
            cap_drop: Some(spec.cap_drop.clone()),
            security_opt: Some(security_opt),
            network_mode: Some(if spec.network { "bridge" } else { "none" }.to_string()),
            binds: if binds.is_empty() { None } else { Some(binds) },
            tmpfs: if tmpfs.is_empty() { None } else { Some(tmpfs) },
            auto_remove: Some(false),
            ..Default::default()
        }
    }
}

#[async_trait]
impl IsolationRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn create(&self, spec: &UnitSpec) -> Result<UnitHandle, SandboxError> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(spec.working_dir.clone()),
            user: spec.user.clone(),
            network_disabled: Some(!spec.network),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::runtime("create", e))?;

        for warning in &response.warnings {
            warn!(container = %spec.name, "Docker warning: {}", warning);
        }

        debug!(container = %spec.name, id = %response.id, "Container created");

        Ok(UnitHandle {
            id: response.id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, unit: &UnitHandle) -> Result<(), SandboxError> {
        self.docker
            .start_container(&unit.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::runtime("start", e))
    }

    async fn wait(&self, unit: &UnitHandle) -> Result<i64, SandboxError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(&unit.id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(SandboxError::runtime("wait", e)),
            None => Err(SandboxError::runtime("wait", "wait stream closed")),
        }
    }

    async fn output(
        &self,
        unit: &UnitHandle,
        max_bytes: usize,
    ) -> Result<CapturedOutput, SandboxError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };
        let mut stream = self.docker.logs(&unit.id, Some(options));

        let mut captured = CapturedOutput::default();
        let mut remaining = max_bytes;

        while let Some(item) = stream.next().await {
            let item = item.map_err(|e| SandboxError::runtime("logs", e))?;
            let (target, message) = match item {
                LogOutput::StdOut { message } => (&mut captured.stdout, message),
                LogOutput::StdErr { message } => (&mut captured.stderr, message),
                _ => continue,
            };
            captured.total_bytes += message.len() as u64;
            let text = String::from_utf8_lossy(&message);
            if append_limited(target, &text, &mut remaining) {
                captured.truncated = true;
            }
        }

        Ok(captured)
    }

    async fn kill(&self, unit: &UnitHandle) -> Result<(), SandboxError> {
        self.docker
            .kill_container(&unit.id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
            .map_err(|e| SandboxError::runtime("kill", e))
    }

    async fn remove(&self, unit: &UnitHandle) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(&unit.id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(SandboxError::runtime("remove", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Mount;

    fn spec(network: bool) -> UnitSpec {
        UnitSpec {
            name: "warden-test".into(),
            image: "python:3.12-alpine".into(),
            command: vec!["python3".into(), "/sandbox/main.py".into()],
            env: vec![],
            working_dir: "/sandbox".into(),
            mounts: vec![Mount::read_only("/tmp/scratch", "/sandbox")],
            tmpfs: vec![("/tmp".into(), "rw,noexec,nosuid,size=16m".into())],
            memory_bytes: 128 * 1024 * 1024,
            nano_cpus: 500_000_000,
            pids_limit: 64,
            network,
            read_only_rootfs: true,
            no_new_privileges: true,
            cap_drop: vec!["ALL".into()],
            user: None,
        }
    }

    #[test]
    fn test_host_config_locks_down_unit() {
        let host = DockerRuntime::host_config(&spec(false));

        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            host.security_opt,
            Some(vec!["no-new-privileges:true".to_string()])
        );
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(
            host.binds,
            Some(vec!["/tmp/scratch:/sandbox:ro".to_string()])
        );
        assert_eq!(host.auto_remove, Some(false));
    }

    #[test]
    fn test_network_opt_in() {
        let host = DockerRuntime::host_config(&spec(true));
        assert_eq!(host.network_mode.as_deref(), Some("bridge"));
    }
}
