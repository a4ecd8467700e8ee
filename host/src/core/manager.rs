use crate::config::{LifecycleConfig, PluginsConfig};
use crate::core::lifecycle::{LifecycleRegistry, PluginLifecycle, PluginState};
use crate::error::{AggregateError, PluginError, Result};
use crate::metrics::PluginMetrics;
use crate::plugin::{CallContext, ConfigPlugin, PluginInfo};
use crate::transport::{PluginLauncher, ProcessHandle};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReadDirStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A loaded plugin: one live process and the client talking to it.
pub struct PluginHandle {
    pub name: String,
    /// Distinguishes successive processes for the same name
    pub instance_id: Uuid,
    pub binary: PathBuf,
    pub process: ProcessHandle,
    pub client: Arc<dyn ConfigPlugin>,
    /// What the plugin reported when it was verified
    pub info: PluginInfo,
    pub loaded_at: DateTime<Utc>,
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name)
            .field("instance_id", &self.instance_id)
            .field("binary", &self.binary)
            .field("process", &self.process)
            .field("version", &self.info.version)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub loaded_plugins: usize,
    pub active_processes: usize,
    pub plugin_directory: PathBuf,
    pub loaded_names: Vec<String>,
}

/// Owns every loaded plugin.
///
/// The handle map sits behind one read-write lock that is never held across
/// a spawn or an RPC. Operations on the same name are serialized through that
/// plugin's lifecycle transition lock, so different plugins load, unload and
/// restart in parallel.
pub struct PluginManager {
    config: PluginsConfig,
    launcher: Arc<dyn PluginLauncher>,
    plugins: RwLock<HashMap<String, Arc<PluginHandle>>>,
    lifecycles: LifecycleRegistry,
    metrics: Arc<PluginMetrics>,
}

impl PluginManager {
    pub fn new(
        config: PluginsConfig,
        lifecycle: LifecycleConfig,
        launcher: Arc<dyn PluginLauncher>,
        metrics: Arc<PluginMetrics>,
    ) -> Self {
        Self {
            config,
            launcher,
            plugins: RwLock::new(HashMap::new()),
            lifecycles: LifecycleRegistry::new(lifecycle),
            metrics,
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn metrics(&self) -> &Arc<PluginMetrics> {
        &self.metrics
    }

    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout()
    }

    /// Loads `name`, or returns the existing handle if it is already loaded.
    pub async fn load_plugin(&self, name: &str) -> Result<Arc<PluginHandle>> {
        if let Some(handle) = self.get_handle(name).await {
            return Ok(handle);
        }

        let lifecycle = self.lifecycles.get_or_create(name);
        let guard = lifecycle.lock().await;
        // Someone else may have finished loading while we waited.
        if let Some(handle) = self.get_handle(name).await {
            debug!("Plugin {} was loaded concurrently", name);
            return Ok(handle);
        }

        guard.mark_initializing();
        let handle = match self.spawn_verified(name).await {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                guard.mark_failed(&e);
                self.metrics.increment_load_failures();
                return Err(e);
            }
        };

        if let Err(e) = guard
            .start(handle.process.clone(), Arc::clone(&handle.client))
            .await
        {
            if let Err(kill_err) = handle.process.kill().await {
                warn!("Failed to kill plugin {}: {}", name, kill_err);
            }
            self.metrics.increment_load_failures();
            return Err(e);
        }

        let _ = self
            .plugins
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&handle));
        self.metrics.increment_loads();
        info!(
            "Loaded plugin {} v{} (pid {:?})",
            name,
            handle.info.version,
            handle.process.pid()
        );
        Ok(handle)
    }

    /// Kills the plugin's process and forgets its handle.
    pub async fn unload_plugin(&self, name: &str) -> Result<()> {
        let lifecycle = self
            .lifecycles
            .get(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
        let guard = lifecycle.lock().await;

        let handle = self
            .plugins
            .write()
            .await
            .remove(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;

        if guard.state() == PluginState::Running {
            if let Err(e) = guard.stop().await {
                warn!("Lifecycle stop for plugin {} reported: {}", name, e);
            }
        }
        // No-op if the lifecycle already killed it.
        handle.process.kill().await?;

        self.metrics.increment_unloads();
        info!("Unloaded plugin {}", name);
        Ok(())
    }

    /// Replaces the plugin's process with a fresh one, loading it if it was
    /// not loaded. The old process is dead before the new one is spawned.
    pub async fn restart_plugin(&self, name: &str) -> Result<Arc<PluginHandle>> {
        let lifecycle = self.lifecycles.get_or_create(name);
        let guard = lifecycle.lock().await;

        let old = self.plugins.write().await.remove(name);
        let mut fresh: Option<PluginHandle> = None;
        let slot = &mut fresh;

        let result = guard
            .restart(move || async move {
                if let Some(old) = old {
                    old.process.kill().await?;
                }
                let handle = self.spawn_verified(name).await?;
                let pair = (handle.process.clone(), Arc::clone(&handle.client));
                *slot = Some(handle);
                Ok(pair)
            })
            .await;

        match (result, fresh) {
            (Ok(()), Some(handle)) => {
                let handle = Arc::new(handle);
                let _ = self
                    .plugins
                    .write()
                    .await
                    .insert(name.to_string(), Arc::clone(&handle));
                self.metrics.increment_restarts();
                info!(
                    "Restarted plugin {} (pid {:?}, restart #{})",
                    name,
                    handle.process.pid(),
                    lifecycle.restart_count()
                );
                Ok(handle)
            }
            (Ok(()), None) => {
                self.metrics.increment_restart_failures();
                Err(PluginError::RestartFailed {
                    name: name.to_string(),
                    source: Box::new(PluginError::NotLoaded(name.to_string())),
                })
            }
            (Err(e), fresh) => {
                if let Some(handle) = fresh {
                    if let Err(kill_err) = handle.process.kill().await {
                        warn!("Failed to kill plugin {}: {}", name, kill_err);
                    }
                }
                self.metrics.increment_restart_failures();
                Err(e)
            }
        }
    }

    /// Loads every name with at most `max_concurrent_loads` loads in flight.
    ///
    /// Waits for all loads to finish and reports every failure together.
    pub async fn load_plugins_concurrently(self: &Arc<Self>, names: &[String]) -> Result<()> {
        let limit = self.config.concurrency_limit();
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = JoinSet::new();
        info!("Loading {} plugins ({} at a time)", names.len(), limit);

        for name in names {
            let manager = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let name = name.clone();
            let _ = tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => manager.load_plugin(&name).await.map(|_| ()),
                    Err(_) => Err(PluginError::NotLoaded(name.clone())),
                };
                (name, result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    warn!("Failed to load plugin {}: {}", name, e);
                    failures.push((name, e));
                }
                Err(e) => error!("Plugin load task panicked: {}", e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new("load", names.len(), failures).into())
        }
    }

    /// Names of the plugin binaries in the plugin directory. Read-only.
    pub async fn discover_plugins(&self) -> Result<Vec<String>> {
        let dir = &self.config.dir;
        let entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PluginError::DirectoryMissing {
                    dir: dir.clone(),
                    plugin: None,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}-", self.config.binary_prefix);
        let mut names = Vec::new();
        let mut entries = ReadDirStream::new(entries);
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            if entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let stem = file_name.strip_suffix(".exe").unwrap_or(file_name);
            if let Some(name) = stem.strip_prefix(&prefix) {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        names.dedup();
        debug!("Discovered {} plugins in {}", names.len(), dir.display());
        Ok(names)
    }

    /// Discovers and concurrently loads every plugin; returns the names found.
    pub async fn discover_and_load_plugins(self: &Arc<Self>) -> Result<Vec<String>> {
        let names = self.discover_plugins().await?;
        self.load_plugins_concurrently(&names).await?;
        Ok(names)
    }

    /// Single `GetInfo` with the configured call timeout.
    pub async fn health_check(&self, name: &str) -> Result<PluginInfo> {
        self.probe(name, self.config.call_timeout()).await
    }

    pub async fn probe(&self, name: &str, timeout: Duration) -> Result<PluginInfo> {
        let handle = self
            .get_handle(name)
            .await
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
        let ctx = CallContext::with_timeout(timeout);
        // Bounded here too, whatever the client does with the deadline.
        ctx.run(handle.client.get_info(&ctx)).await
    }

    pub async fn get_plugin(&self, name: &str) -> Result<Arc<dyn ConfigPlugin>> {
        self.get_handle(name)
            .await
            .map(|handle| Arc::clone(&handle.client))
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))
    }

    pub async fn get_handle(&self, name: &str) -> Option<Arc<PluginHandle>> {
        self.plugins.read().await.get(name).cloned()
    }

    pub async fn list_loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Asks the running plugin for its current info.
    pub async fn get_plugin_info(&self, name: &str) -> Result<PluginInfo> {
        debug!("Fetching info for plugin {}", name);
        self.probe(name, self.config.call_timeout()).await
    }

    /// Unloads every plugin concurrently.
    pub async fn shutdown(self: &Arc<Self>) -> Result<()> {
        let names = self.list_loaded_plugins().await;
        info!("Shutting down {} plugins", names.len());

        let mut tasks = JoinSet::new();
        for name in names.iter().cloned() {
            let manager = Arc::clone(self);
            let _ = tasks.spawn(async move {
                let result = manager.unload_plugin(&name).await;
                (name, result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) | Ok((_, Err(PluginError::NotLoaded(_)))) => {}
                Ok((name, Err(e))) => failures.push((name, e)),
                Err(e) => error!("Plugin unload task panicked: {}", e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError::new("unload", names.len(), failures).into())
        }
    }

    pub fn lifecycle(&self, name: &str) -> Option<Arc<PluginLifecycle>> {
        self.lifecycles.get(name)
    }

    pub fn lifecycle_states(&self) -> HashMap<String, PluginState> {
        self.lifecycles.all_states()
    }

    pub async fn get_stats(&self) -> ManagerStats {
        let handles: Vec<Arc<PluginHandle>> = self.plugins.read().await.values().cloned().collect();
        let mut active_processes = 0;
        for handle in &handles {
            if handle.process.is_alive().await {
                active_processes += 1;
            }
        }
        let mut loaded_names: Vec<String> = handles.iter().map(|h| h.name.clone()).collect();
        loaded_names.sort();

        ManagerStats {
            loaded_plugins: handles.len(),
            active_processes,
            plugin_directory: self.config.dir.clone(),
            loaded_names,
        }
    }

    /// `<dir>/<prefix>-<name>`, falling back to the `.exe` variant.
    async fn resolve_binary(&self, name: &str) -> Result<PathBuf> {
        let dir = &self.config.dir;
        let base = dir.join(format!("{}-{}", self.config.binary_prefix, name));
        let exe = dir.join(format!("{}-{}.exe", self.config.binary_prefix, name));

        for candidate in [base, exe] {
            if let Ok(meta) = tokio::fs::metadata(&candidate).await {
                if meta.is_file() {
                    return Ok(candidate);
                }
            }
        }

        if tokio::fs::metadata(dir).await.is_err() {
            return Err(PluginError::DirectoryMissing {
                dir: dir.clone(),
                plugin: Some(name.to_string()),
            });
        }
        Err(PluginError::NotFound {
            name: name.to_string(),
            dir: dir.clone(),
        })
    }

    /// Spawns the plugin and checks it speaks our API version. Never leaves a
    /// process behind on failure.
    async fn spawn_verified(&self, name: &str) -> Result<PluginHandle> {
        let binary = self.resolve_binary(name).await?;
        let launched = self.launcher.launch(name, &binary).await?;

        match self.verify(name, launched.client.as_ref()).await {
            Ok(info) => Ok(PluginHandle {
                name: name.to_string(),
                instance_id: Uuid::new_v4(),
                binary,
                process: launched.process,
                client: launched.client,
                info,
                loaded_at: Utc::now(),
            }),
            Err(e) => {
                warn!("Plugin {} rejected: {}", name, e);
                if let Err(kill_err) = launched.process.kill().await {
                    warn!("Failed to kill rejected plugin {}: {}", name, kill_err);
                }
                Err(e)
            }
        }
    }

    async fn verify(&self, name: &str, client: &dyn ConfigPlugin) -> Result<PluginInfo> {
        let ctx = CallContext::with_timeout(self.config.call_timeout());
        let info = match client.get_info(&ctx).await {
            Ok(info) => info,
            Err(PluginError::Rpc(status)) if status.code() == tonic::Code::Unimplemented => {
                return Err(PluginError::ContractViolation {
                    name: name.to_string(),
                    reason: format!("GetInfo is not implemented: {}", status.message()),
                })
            }
            Err(e @ PluginError::ContractViolation { .. }) => return Err(e),
            Err(e) => {
                return Err(PluginError::Handshake {
                    name: name.to_string(),
                    reason: format!("verification call failed: {}", e),
                })
            }
        };

        if info.api_version != self.config.api_version {
            return Err(PluginError::VersionMismatch {
                name: name.to_string(),
                expected: self.config.api_version.clone(),
                actual: info.api_version,
            });
        }
        Ok(info)
    }
}
