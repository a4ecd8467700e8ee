use crate::config::HostConfig;
use crate::core::health::HealthMonitor;
use crate::core::manager::PluginManager;
use crate::error::PluginError;
use crate::logging::LogLevelHandle;
use crate::metrics::PluginMetrics;
use crate::plugin::Registry;
use crate::transport::{PluginLauncher, ProcessLauncher};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Wires the manager, registry and health monitor together for the binary.
pub struct Orchestrator {
    config: HostConfig,
    manager: Arc<PluginManager>,
    registry: Arc<Registry>,
    health_monitor: Arc<HealthMonitor>,
    metrics: Arc<PluginMetrics>,
    log_levels: Option<LogLevelHandle>,
}

impl Orchestrator {
    pub fn new(config: HostConfig) -> Self {
        let launcher: Arc<dyn PluginLauncher> = Arc::new(ProcessLauncher::new(
            config.handshake.clone(),
            config.plugins.startup_timeout(),
        ));
        Self::with_launcher(config, launcher)
    }

    pub fn with_launcher(config: HostConfig, launcher: Arc<dyn PluginLauncher>) -> Self {
        info!(
            "Initializing plugin host for directory {}",
            config.plugins.dir.display()
        );

        let metrics = Arc::new(PluginMetrics::new());
        let manager = Arc::new(PluginManager::new(
            config.plugins.clone(),
            config.lifecycle.clone(),
            launcher,
            Arc::clone(&metrics),
        ));
        let registry = Arc::new(Registry::new(Arc::clone(&manager)));
        let health_monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&manager),
            config.health.clone(),
        ));

        Self {
            config,
            manager,
            registry,
            health_monitor,
            metrics,
            log_levels: None,
        }
    }

    pub fn with_log_levels(mut self, log_levels: LogLevelHandle) -> Self {
        self.log_levels = Some(log_levels);
        self
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health_monitor
    }

    pub fn metrics(&self) -> &Arc<PluginMetrics> {
        &self.metrics
    }

    /// Loads every discovered plugin and starts health monitoring. Individual
    /// load failures are logged, not fatal.
    pub async fn start(&self) -> Result<()> {
        let names = self
            .registry
            .discover_plugins()
            .await
            .context("Failed to discover plugins")?;
        info!("Discovered {} plugins: {:?}", names.len(), names);

        match self.registry.load_plugins(&names).await {
            Ok(()) => {}
            Err(PluginError::Aggregate(failures)) => {
                for (name, e) in &failures.failures {
                    self.report_load_failure(name, e);
                }
            }
            Err(e) => return Err(e).context("Failed to load plugins"),
        }

        let loaded = self.manager.list_loaded_plugins().await;
        info!("{} of {} plugins loaded", loaded.len(), names.len());

        self.health_monitor.start();
        Ok(())
    }

    pub async fn run(&self) -> Result<()> {
        info!("Starting plugin host");
        self.start().await?;

        info!("Plugin host running");
        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");

        self.shutdown().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.health_monitor.stop().await;
        if let Err(e) = self.registry.shutdown().await {
            error!("Plugin shutdown incomplete: {}", e);
            return Err(e.into());
        }

        let snapshot = self.metrics.snapshot();
        info!(
            "Plugin host stopped (loads {}, restarts {}, restart requests {})",
            snapshot.loads_total, snapshot.restarts_total, snapshot.restart_requests_total
        );
        Ok(())
    }

    fn report_load_failure(&self, name: &str, err: &PluginError) {
        warn!(
            "Plugin {} not loaded ({:?}): {}",
            name,
            err.category(),
            err
        );
    }

    /// Changes the host's log level without restarting it.
    pub fn set_log_level(&self, level: &str) -> Result<()> {
        let Some(log_levels) = &self.log_levels else {
            anyhow::bail!("Log level is fixed: no reloadable subscriber installed");
        };
        log_levels.set_level(level)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }
}
