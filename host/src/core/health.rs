use crate::config::HealthConfig;
use crate::core::lifecycle::PluginState;
use crate::core::manager::PluginManager;
use crate::error::{AggregateError, PluginError, Result};
use crate::plugin::PluginInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// Never probed, or failing but still under the threshold
    Unknown,
    /// Restarted, waiting for a probe to confirm
    Starting,
    /// Restart in progress
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_response_latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// Display-only copy of the last reported plugin info
    pub metadata: HashMap<String, String>,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_check: None,
            last_response_latency: None,
            consecutive_failures: 0,
            last_error: None,
            metadata: HashMap::new(),
        }
    }
}

fn info_metadata(info: &PluginInfo) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    let _ = metadata.insert("name".to_string(), info.name.clone());
    let _ = metadata.insert("version".to_string(), info.version.clone());
    let _ = metadata.insert("api_version".to_string(), info.api_version.clone());
    let capabilities: Vec<&str> = info.capabilities.iter().map(String::as_str).collect();
    let _ = metadata.insert("capabilities".to_string(), capabilities.join(","));
    metadata
}

/// Polls every loaded plugin and restarts the ones that keep failing.
///
/// Restart requests go through a bounded queue to a single worker task, so at
/// most one restart runs at a time and a plugin is never queued twice.
pub struct HealthMonitor {
    manager: Arc<PluginManager>,
    config: HealthConfig,
    checks: RwLock<HashMap<String, HealthCheck>>,
    restart_tx: mpsc::Sender<String>,
    restart_rx: Mutex<Option<mpsc::Receiver<String>>>,
    pending_restarts: Mutex<HashSet<String>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<PluginManager>, config: HealthConfig) -> Self {
        let (restart_tx, restart_rx) = mpsc::channel(config.restart_queue_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            manager,
            config,
            checks: RwLock::new(HashMap::new()),
            restart_tx,
            restart_rx: Mutex::new(Some(restart_rx)),
            pending_restarts: Mutex::new(HashSet::new()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the poll loop and the restart worker. The first tick fires one
    /// interval from now. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Some(restart_rx) = lock(&self.restart_rx).take() else {
            warn!("Health monitor already started");
            return;
        };
        info!(
            "Starting health monitor (interval {:?}, threshold {})",
            self.config.interval(),
            self.config.failure_threshold
        );

        let poll = tokio::spawn(Arc::clone(self).poll_loop(self.shutdown.subscribe()));
        let worker = tokio::spawn(
            Arc::clone(self).restart_worker(restart_rx, self.shutdown.subscribe()),
        );
        lock(&self.tasks).extend([poll, worker]);
    }

    /// Stops both background tasks. A restart already underway finishes first.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                error!("Health monitor task failed: {}", e);
            }
        }
        info!("Health monitor stopped");
    }

    async fn poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_all_plugins().await,
                _ = shutdown.changed() => break,
            }
        }
        debug!("Health poll loop exited");
    }

    async fn restart_worker(
        self: Arc<Self>,
        mut requests: mpsc::Receiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let name = tokio::select! {
                received = requests.recv() => match received {
                    Some(name) => name,
                    None => break,
                },
                _ = shutdown.changed() => break,
            };
            // Outcome is recorded in the health cache.
            let _ = self.perform_restart(&name).await;
            let _ = lock(&self.pending_restarts).remove(&name);
        }
        debug!("Restart worker exited");
    }

    /// Probes every currently loaded plugin and returns once all probes finish.
    pub async fn check_all_plugins(self: &Arc<Self>) {
        let names = self.manager.list_loaded_plugins().await;
        debug!("Health check tick over {} plugins", names.len());

        let mut probes = JoinSet::new();
        for name in names {
            let monitor = Arc::clone(self);
            let _ = probes.spawn(async move { monitor.check_plugin(&name).await });
        }
        while let Some(joined) = probes.join_next().await {
            if let Err(e) = joined {
                error!("Health probe task panicked: {}", e);
            }
        }
    }

    async fn check_plugin(&self, name: &str) {
        let metrics = self.manager.metrics();
        metrics.increment_health_checks();

        let started = Instant::now();
        let result = self.manager.probe(name, self.config.timeout()).await;
        let latency = started.elapsed();
        let restarting = lock(&self.pending_restarts).contains(name);

        let needs_restart = {
            let mut checks = self.write_checks();
            let check = checks.entry(name.to_string()).or_default();
            check.last_check = Some(Utc::now());

            match result {
                Ok(info) => {
                    check.status = HealthStatus::Healthy;
                    check.consecutive_failures = 0;
                    check.last_response_latency = Some(latency);
                    check.last_error = None;
                    check.metadata = info_metadata(&info);
                    false
                }
                // Unloaded between listing and probing; a restart in flight
                // owns the status until it finishes.
                Err(PluginError::NotLoaded(_)) if restarting => false,
                Err(e @ PluginError::NotLoaded(_)) => {
                    check.status = HealthStatus::Unhealthy;
                    check.last_error = Some(e.to_string());
                    false
                }
                Err(e) => {
                    metrics.increment_health_check_failures();
                    check.consecutive_failures += 1;
                    check.last_error = Some(e.to_string());
                    warn!(
                        "Health check failed for plugin {} ({}/{}): {}",
                        name, check.consecutive_failures, self.config.failure_threshold, e
                    );
                    if check.consecutive_failures >= self.config.failure_threshold {
                        check.status = HealthStatus::Unhealthy;
                        true
                    } else {
                        check.status = HealthStatus::Unknown;
                        false
                    }
                }
            }
        };

        if needs_restart {
            self.request_restart(name);
        }
    }

    fn request_restart(&self, name: &str) {
        if !lock(&self.pending_restarts).insert(name.to_string()) {
            debug!("Restart of plugin {} already pending", name);
            return;
        }

        match self.restart_tx.try_send(name.to_string()) {
            Ok(()) => {
                self.manager.metrics().increment_restart_requests();
                // Optimistic: the next ticks decide whether the restart helped.
                if let Some(check) = self.write_checks().get_mut(name) {
                    check.consecutive_failures = 0;
                }
                warn!("Plugin {} is unhealthy, restart requested", name);
            }
            Err(e) => {
                let _ = lock(&self.pending_restarts).remove(name);
                error!("Could not queue restart of plugin {}: {}", name, e);
            }
        }
    }

    async fn perform_restart(&self, name: &str) -> Result<()> {
        self.set_status(name, HealthStatus::Stopping);

        match self.manager.restart_plugin(name).await {
            Ok(handle) => {
                let mut checks = self.write_checks();
                let check = checks.entry(name.to_string()).or_default();
                check.status = HealthStatus::Starting;
                check.metadata = info_metadata(&handle.info);
                info!("Plugin {} restarted by health monitor", name);
                Ok(())
            }
            Err(e) => {
                error!("Health monitor failed to restart plugin {}: {}", name, e);
                let mut checks = self.write_checks();
                let check = checks.entry(name.to_string()).or_default();
                check.status = HealthStatus::Unhealthy;
                check.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Restarts, one at a time, every running or failed plugin that is not
    /// currently healthy. Plugins already restarting are left alone.
    pub async fn restart_unhealthy(&self) -> Result<()> {
        let mut candidates: Vec<String> = self
            .manager
            .lifecycle_states()
            .into_iter()
            .filter(|(name, state)| {
                matches!(state, PluginState::Running | PluginState::Error) && !self.is_healthy(name)
            })
            .map(|(name, _)| name)
            .collect();
        candidates.sort();
        info!("Restarting {} unhealthy plugins", candidates.len());

        let attempted = candidates.len();
        let mut failures = Vec::new();
        for name in candidates {
            if !lock(&self.pending_restarts).insert(name.clone()) {
                debug!("Restart of plugin {} already pending", name);
                continue;
            }
            let result = self.perform_restart(&name).await;
            let _ = lock(&self.pending_restarts).remove(&name);
            if let Err(e) = result {
                failures.push((name, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new("restart", attempted, failures).into())
        }
    }

    pub fn get_health(&self, name: &str) -> Option<HealthCheck> {
        self.read_checks().get(name).cloned()
    }

    pub fn get_all_health(&self) -> HashMap<String, HealthCheck> {
        self.read_checks().clone()
    }

    pub fn is_healthy(&self, name: &str) -> bool {
        self.read_checks()
            .get(name)
            .map(|check| check.status == HealthStatus::Healthy)
            .unwrap_or(false)
    }

    /// Polls the cached status until the plugin is healthy or `timeout` passes.
    pub async fn wait_for_healthy(&self, name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let poll = self.config.wait_poll_interval();
        loop {
            if self.is_healthy(name) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PluginError::HealthTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    fn set_status(&self, name: &str, status: HealthStatus) {
        self.write_checks()
            .entry(name.to_string())
            .or_default()
            .status = status;
    }

    fn read_checks(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, HealthCheck>> {
        self.checks.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_checks(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HealthCheck>> {
        self.checks.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
