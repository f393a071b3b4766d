//! Backend supervisor: allocate a port, compose the environment, spawn, probe.
//!
//! A launch either returns an [`Instance`] whose `/status` has already answered, or
//! an error. The child is bound to the registry as soon as it is spawned, so a host
//! shutdown during probing kills it. When probing gives up, the child is killed and
//! reaped before the error is returned.

use crate::config::{self, Config};
use crate::env::{self, EnvMap};
use crate::launch::{self, drain_output, OutputSink, OutputTag, SpawnError, StreamKind};
use crate::lifecycle::{bind_lifecycle, InstanceHandle, InstanceRegistry};
use crate::locate;
use crate::port::{AllocationError, PortAllocator};
use crate::probe::{self, HealthCheck, HttpHealthCheck, ProbePolicy, Readiness};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("backend on port {port} did not become ready after {attempts} attempts")]
    StartupTimeout { port: u16, attempts: u32 },
    #[error("backend on port {port} was terminated before it became ready")]
    Terminated { port: u16 },
}

/// Static launch settings shared by every instance.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Home directory injected as HOME / USERPROFILE.
    pub home: PathBuf,
    /// Working directory when a request does not name one.
    pub default_working_dir: PathBuf,
    /// Variables added to every instance; per-launch variables override them.
    pub env: EnvMap,
    pub probe: ProbePolicy,
}

impl SupervisorConfig {
    /// Build from the host config, resolving the backend executable.
    pub fn from_config(config: &Config) -> Result<Self, SpawnError> {
        let executable = locate::resolve_backend_binary(config.backend.binary_path.as_deref())?;
        Ok(Self {
            executable,
            args: vec![config.backend.subcommand.clone()],
            home: config::home_dir(),
            default_working_dir: config::resolve_working_dir(config, None),
            env: config.backend.env.clone(),
            probe: config.probe.policy(),
        })
    }
}

/// Per-launch options.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub working_dir: Option<PathBuf>,
    pub env: EnvMap,
}

/// A backend instance that has proven readiness.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: Uuid,
    pub port: u16,
    pub working_dir: PathBuf,
    pub handle: InstanceHandle,
    pub launched_at: DateTime<Utc>,
}

impl Instance {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    ports: PortAllocator,
    registry: InstanceRegistry,
    health: Arc<dyn HealthCheck>,
    output_sink: Option<OutputSink>,
    base_env: Option<EnvMap>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, registry: InstanceRegistry) -> Self {
        let health = Arc::new(HttpHealthCheck::new(config.probe.request_timeout));
        Self {
            config,
            ports: PortAllocator::new(),
            registry,
            health,
            output_sink: None,
            base_env: None,
        }
    }

    /// Forward every backend output line to `sink` in addition to the log.
    pub fn with_output_sink(mut self, sink: OutputSink) -> Self {
        self.output_sink = Some(sink);
        self
    }

    /// Use `base` instead of a fresh snapshot of this process's environment.
    pub fn with_base_env(mut self, base: EnvMap) -> Self {
        self.base_env = Some(base);
        self
    }

    pub fn with_health_check(mut self, health: Arc<dyn HealthCheck>) -> Self {
        self.health = health;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// One launch attempt: allocate → compose → spawn → probe.
    pub async fn launch(&self, request: LaunchRequest) -> Result<Instance, SupervisorError> {
        let id = Uuid::new_v4();
        let launched_at = Utc::now();
        let lease = self.ports.lease()?;
        let port = lease.port();
        let working_dir = request
            .working_dir
            .unwrap_or_else(|| self.config.default_working_dir.clone());

        let base = match &self.base_env {
            Some(base) => base.clone(),
            None => env::parent_env(),
        };
        let mut overrides = self.config.env.clone();
        overrides.extend(request.env);
        let child_env = env::compose(&base, port, &self.config.home, &overrides);

        log::info!(
            "launching backend {} on port {} in {}",
            id,
            port,
            working_dir.display()
        );
        let launched = launch::launch(
            &self.config.executable,
            &self.config.args,
            &working_dir,
            &child_env,
        )?;
        let tag = OutputTag {
            instance_id: id,
            port,
            working_dir: working_dir.clone(),
        };
        drain_output(
            launched.stdout,
            StreamKind::Stdout,
            tag.clone(),
            self.output_sink.clone(),
        );
        drain_output(
            launched.stderr,
            StreamKind::Stderr,
            tag,
            self.output_sink.clone(),
        );
        let handle = InstanceHandle::new(id, launched.child, Some(lease));
        bind_lifecycle(&self.registry, &handle).await;

        let probed = tokio::select! {
            state = probe::probe_with(self.health.as_ref(), port, &self.config.probe) => Some(state),
            _ = handle.wait_terminated() => None,
        };
        match probed {
            Some(Readiness::Ready { .. }) => Ok(Instance {
                id,
                port,
                working_dir,
                handle,
                launched_at,
            }),
            Some(Readiness::Failed { attempts }) | Some(Readiness::Probing { attempt: attempts }) => {
                self.registry.terminate(id).await;
                handle.terminate().await;
                Err(SupervisorError::StartupTimeout { port, attempts })
            }
            None => {
                log::info!("backend {} on port {} terminated during startup", id, port);
                self.registry.remove(id).await;
                handle.terminate().await;
                Err(SupervisorError::Terminated { port })
            }
        }
    }

    /// Terminate one instance early (e.g. its window closed).
    pub async fn terminate(&self, id: Uuid) -> bool {
        self.registry.terminate(id).await
    }

    /// Terminate every instance this supervisor registered.
    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }
}
