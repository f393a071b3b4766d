//! Host application object: owns the instance registry for the life of the process
//! and terminates every backend it launched when the process is asked to stop.

use futures_util::future::join_all;
use goose_host::backend::BackendClient;
use goose_host::config::Config;
use goose_host::{Instance, InstanceRegistry, LaunchRequest, Supervisor, SupervisorConfig};
use std::path::PathBuf;
use std::time::Duration;

/// How often to check whether every instance has exited on its own.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct Host {
    supervisor: Supervisor,
}

impl Host {
    /// Build from config; `binary` overrides the configured backend executable.
    pub fn new(config: &Config, binary: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = config.clone();
        if binary.is_some() {
            config.backend.binary_path = binary;
        }
        let supervisor_config = SupervisorConfig::from_config(&config)?;
        log::debug!(
            "backend executable {}",
            supervisor_config.executable.display()
        );
        Ok(Self {
            supervisor: Supervisor::new(supervisor_config, InstanceRegistry::new()),
        })
    }

    pub fn registry(&self) -> &InstanceRegistry {
        self.supervisor.registry()
    }

    /// Launch `count` instances concurrently. Failed launches are logged and skipped.
    pub async fn launch_many(&self, count: usize, request: LaunchRequest) -> Vec<Instance> {
        let results = join_all((0..count).map(|_| self.supervisor.launch(request.clone()))).await;
        results
            .into_iter()
            .filter_map(|r| match r {
                Ok(instance) => Some(instance),
                Err(e) => {
                    log::error!("backend failed to start: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Print one `port<TAB>working dir<TAB>version` line per instance.
    pub async fn report(&self, instances: &[Instance]) {
        for instance in instances {
            let version = BackendClient::new(instance.port).current_version().await;
            println!(
                "{}\t{}\t{}",
                instance.port,
                instance.working_dir.display(),
                version
            );
        }
    }

    /// Launch `count` instances, report them, and keep them running until SIGINT/SIGTERM
    /// or until every instance has exited; then terminate all. A signal during startup
    /// also kills the backends that are still probing.
    pub async fn run(&self, count: usize, request: LaunchRequest) -> anyhow::Result<()> {
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        // Shutdown is polled first so its handlers are in place before any spawn.
        let instances = tokio::select! {
            biased;
            _ = &mut shutdown => {
                log::info!("shutdown signal received during startup, stopping backends");
                self.supervisor.shutdown().await;
                return Ok(());
            }
            instances = self.launch_many(count, request) => instances,
        };
        if instances.is_empty() {
            anyhow::bail!("no backend instance became ready");
        }
        log::info!(
            "{} of {} backend instance(s) ready",
            self.registry().len().await,
            count
        );

        tokio::select! {
            _ = &mut shutdown => {
                log::info!("shutdown signal received, stopping backends");
            }
            _ = async {
                self.report(&instances).await;
                all_exited(&instances).await;
            } => {
                log::info!("every backend exited");
            }
        }
        self.supervisor.shutdown().await;
        Ok(())
    }
}

async fn all_exited(instances: &[Instance]) {
    loop {
        let mut running = 0;
        for instance in instances {
            if !instance.handle.try_exited().await {
                running += 1;
            }
        }
        if running == 0 {
            return;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
