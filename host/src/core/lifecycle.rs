use crate::config::LifecycleConfig;
use crate::error::{AggregateError, PluginError, Result};
use crate::plugin::{CallContext, ConfigPlugin};
use crate::transport::ProcessHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unknown,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Error,
    Restarting,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Unknown => "unknown",
            PluginState::Initializing => "initializing",
            PluginState::Running => "running",
            PluginState::Stopping => "stopping",
            PluginState::Stopped => "stopped",
            PluginState::Error => "error",
            PluginState::Restarting => "restarting",
        };
        f.write_str(s)
    }
}

struct LifecycleInner {
    state: PluginState,
    process: Option<ProcessHandle>,
    client: Option<Arc<dyn ConfigPlugin>>,
    started_at: Option<DateTime<Utc>>,
    running_since: Option<Instant>,
    stopped_at: Option<DateTime<Utc>>,
    restart_count: u32,
    last_error: Option<String>,
}

/// Serializable view of a lifecycle for status output.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleInfo {
    pub name: String,
    pub state: PluginState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

/// State machine for one plugin name.
///
/// ```text
/// Unknown -> Initializing -> Running -> Stopping -> Stopped
///                 |
///                 v
///               Error          (any) --restart--> Restarting -> Running | Error
/// ```
///
/// Transitions are serialized by an async mutex held for the whole
/// transition, including the RPC and process work. State reads never wait on
/// a transition.
pub struct PluginLifecycle {
    name: String,
    transition: Mutex<()>,
    inner: RwLock<LifecycleInner>,
    start_timeout: Duration,
    restart_delay: Duration,
}

impl PluginLifecycle {
    pub fn new(name: impl Into<String>, config: &LifecycleConfig) -> Self {
        Self {
            name: name.into(),
            transition: Mutex::new(()),
            inner: RwLock::new(LifecycleInner {
                state: PluginState::Unknown,
                process: None,
                client: None,
                started_at: None,
                running_since: None,
                stopped_at: None,
                restart_count: 0,
                last_error: None,
            }),
            start_timeout: config.start_timeout(),
            restart_delay: config.restart_delay(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for any in-flight transition and blocks new ones until the guard
    /// is dropped.
    pub async fn lock(&self) -> TransitionGuard<'_> {
        TransitionGuard {
            lifecycle: self,
            _lock: self.transition.lock().await,
        }
    }

    pub async fn start(&self, process: ProcessHandle, client: Arc<dyn ConfigPlugin>) -> Result<()> {
        self.lock().await.start(process, client).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.lock().await.stop().await
    }

    pub async fn restart<F, Fut>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(ProcessHandle, Arc<dyn ConfigPlugin>)>> + Send,
    {
        self.lock().await.restart(factory).await
    }

    pub fn get_state(&self) -> PluginState {
        self.read().state
    }

    pub fn is_running(&self) -> bool {
        self.get_state() == PluginState::Running
    }

    /// Time since the last successful start; zero unless running.
    pub fn uptime(&self) -> Duration {
        let inner = self.read();
        match (inner.state, inner.running_since) {
            (PluginState::Running, Some(since)) => since.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn restart_count(&self) -> u32 {
        self.read().restart_count
    }

    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    pub fn client(&self) -> Option<Arc<dyn ConfigPlugin>> {
        self.read().client.clone()
    }

    pub fn process(&self) -> Option<ProcessHandle> {
        self.read().process.clone()
    }

    pub fn info(&self) -> LifecycleInfo {
        let uptime = self.uptime();
        let inner = self.read();
        LifecycleInfo {
            name: self.name.clone(),
            state: inner.state,
            pid: inner.process.as_ref().and_then(ProcessHandle::pid),
            started_at: inner.started_at,
            stopped_at: inner.stopped_at,
            uptime_secs: uptime.as_secs(),
            restart_count: inner.restart_count,
            last_error: inner.last_error.clone(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LifecycleInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LifecycleInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Detaches the process and client, leaving the state untouched.
    fn take_handles(&self) -> Option<ProcessHandle> {
        let mut inner = self.write();
        inner.client = None;
        inner.running_since = None;
        inner.process.take()
    }

    fn fail(&self, err: &PluginError) {
        let mut inner = self.write();
        inner.state = PluginState::Error;
        inner.last_error = Some(err.to_string());
        inner.process = None;
        inner.client = None;
        inner.running_since = None;
    }
}

impl fmt::Debug for PluginLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLifecycle")
            .field("name", &self.name)
            .field("state", &self.get_state())
            .field("restart_count", &self.restart_count())
            .finish()
    }
}

/// Exclusive right to transition one lifecycle.
pub struct TransitionGuard<'a> {
    lifecycle: &'a PluginLifecycle,
    _lock: MutexGuard<'a, ()>,
}

impl TransitionGuard<'_> {
    pub fn state(&self) -> PluginState {
        self.lifecycle.get_state()
    }

    /// Records that a new process is being brought up for this plugin.
    pub fn mark_initializing(&self) {
        self.lifecycle.write().state = PluginState::Initializing;
    }

    /// Records a failure that happened before a process could be handed over.
    pub fn mark_failed(&self, err: &PluginError) {
        self.lifecycle.fail(err);
    }

    /// Takes ownership of `process` and proves it alive with `GetInfo`.
    ///
    /// On failure the process is killed, the state becomes `Error` and the
    /// cause is kept in `last_error`.
    pub async fn start(&self, process: ProcessHandle, client: Arc<dyn ConfigPlugin>) -> Result<()> {
        let lifecycle = self.lifecycle;
        {
            let mut inner = lifecycle.write();
            if inner.state == PluginState::Running {
                return Err(PluginError::AlreadyRunning(lifecycle.name.clone()));
            }
            inner.state = PluginState::Initializing;
            inner.process = Some(process.clone());
            inner.client = Some(Arc::clone(&client));
        }

        let ctx = CallContext::with_timeout(lifecycle.start_timeout);
        match client.get_info(&ctx).await {
            Ok(info) => {
                let mut inner = lifecycle.write();
                inner.state = PluginState::Running;
                inner.started_at = Some(Utc::now());
                inner.running_since = Some(Instant::now());
                inner.stopped_at = None;
                inner.last_error = None;
                info!(
                    "Plugin {} running (version {}, pid {:?})",
                    lifecycle.name,
                    info.version,
                    process.pid()
                );
                Ok(())
            }
            Err(e) => {
                error!("Plugin {} failed to initialize: {}", lifecycle.name, e);
                lifecycle.fail(&e);
                if let Err(kill_err) = process.kill().await {
                    warn!(
                        "Failed to kill plugin {} after failed start: {}",
                        lifecycle.name, kill_err
                    );
                }
                Err(PluginError::InitFailed {
                    name: lifecycle.name.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Kills the process without asking it to shut down.
    pub async fn stop(&self) -> Result<()> {
        let lifecycle = self.lifecycle;
        {
            let mut inner = lifecycle.write();
            if inner.state != PluginState::Running {
                return Err(PluginError::NotRunning(lifecycle.name.clone()));
            }
            inner.state = PluginState::Stopping;
        }
        info!("Stopping plugin {}", lifecycle.name);

        let process = lifecycle.take_handles();
        let killed = match process {
            Some(process) => process.kill().await,
            None => Ok(()),
        };

        {
            let mut inner = lifecycle.write();
            inner.state = PluginState::Stopped;
            inner.stopped_at = Some(Utc::now());
            if let Err(e) = &killed {
                inner.last_error = Some(e.to_string());
            }
        }
        killed
    }

    /// Tears down whatever is running, waits `restart_delay`, then starts the
    /// pair produced by `factory`. A failed factory is not retried.
    pub async fn restart<F, Fut>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(ProcessHandle, Arc<dyn ConfigPlugin>)>> + Send,
    {
        let lifecycle = self.lifecycle;
        let restart_count = {
            let mut inner = lifecycle.write();
            inner.state = PluginState::Restarting;
            inner.restart_count += 1;
            inner.restart_count
        };
        info!("Restarting plugin {} (restart #{})", lifecycle.name, restart_count);

        if let Some(process) = lifecycle.take_handles() {
            if let Err(e) = process.kill().await {
                warn!("Failed to kill plugin {} during restart: {}", lifecycle.name, e);
            }
            lifecycle.write().stopped_at = Some(Utc::now());
        }

        tokio::time::sleep(lifecycle.restart_delay).await;

        let (process, client) = match factory().await {
            Ok(pair) => pair,
            Err(e) => {
                error!("Plugin {} restart failed: {}", lifecycle.name, e);
                lifecycle.fail(&e);
                return Err(PluginError::RestartFailed {
                    name: lifecycle.name.clone(),
                    source: Box::new(e),
                });
            }
        };

        self.start(process, client)
            .await
            .map_err(|e| PluginError::RestartFailed {
                name: lifecycle.name.clone(),
                source: Box::new(e),
            })
    }
}

/// Owns one [`PluginLifecycle`] per plugin name.
pub struct LifecycleRegistry {
    config: LifecycleConfig,
    lifecycles: RwLock<HashMap<String, Arc<PluginLifecycle>>>,
}

impl LifecycleRegistry {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            lifecycles: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<PluginLifecycle> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut lifecycles = self
            .lifecycles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            lifecycles
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(PluginLifecycle::new(name, &self.config))),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<PluginLifecycle>> {
        self.lifecycles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Adds `lifecycle`, replacing any previous one with the same name.
    pub fn register(&self, lifecycle: Arc<PluginLifecycle>) -> Option<Arc<PluginLifecycle>> {
        self.lifecycles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(lifecycle.name().to_string(), lifecycle)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<PluginLifecycle>> {
        self.lifecycles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
    }

    pub fn all_states(&self) -> HashMap<String, PluginState> {
        self.snapshot()
            .into_iter()
            .map(|lifecycle| (lifecycle.name().to_string(), lifecycle.get_state()))
            .collect()
    }

    pub fn running_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|lifecycle| lifecycle.is_running())
            .map(|lifecycle| lifecycle.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Stops every running lifecycle concurrently.
    pub async fn stop_all(&self) -> Result<()> {
        let running: Vec<Arc<PluginLifecycle>> = self
            .snapshot()
            .into_iter()
            .filter(|lifecycle| lifecycle.is_running())
            .collect();
        let attempted = running.len();

        let mut tasks = JoinSet::new();
        for lifecycle in running {
            let _ = tasks.spawn(async move {
                let result = lifecycle.stop().await;
                (lifecycle.name().to_string(), result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                // Raced with another stop; nothing left to do.
                Ok((_, Err(PluginError::NotRunning(_)))) => {}
                Ok((name, Err(e))) => failures.push((name, e)),
                Err(e) => error!("Lifecycle stop task panicked: {}", e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new("stop", attempted, failures).into())
        }
    }

    fn snapshot(&self) -> Vec<Arc<PluginLifecycle>> {
        self.lifecycles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }
}
