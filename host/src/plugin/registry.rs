use crate::core::manager::{ManagerStats, PluginManager};
use crate::error::{PluginError, Result};
use crate::plugin::{ConfigPlugin, PluginInfo};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    /// Plugins loaded through this registry
    pub loaded_plugins: usize,
    pub manager: ManagerStats,
}

/// Load-on-demand lookup over a [`PluginManager`], caching the info of every
/// plugin it has loaded. Does no health monitoring of its own.
pub struct Registry {
    manager: Arc<PluginManager>,
    plugins: RwLock<HashMap<String, PluginInfo>>,
}

impl Registry {
    pub fn new(manager: Arc<PluginManager>) -> Self {
        Self {
            manager,
            plugins: RwLock::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    /// Returns the plugin's client, loading the plugin first if needed.
    pub async fn get_plugin(&self, name: &str) -> Result<Arc<dyn ConfigPlugin>> {
        if self.plugins.read().await.contains_key(name) {
            match self.manager.get_plugin(name).await {
                Ok(client) => return Ok(client),
                // Unloaded or mid-restart behind our back; reload below.
                Err(PluginError::NotLoaded(_)) => {
                    debug!("Cached plugin {} is no longer loaded", name)
                }
                Err(e) => return Err(e),
            }
        }
        self.load_plugin(name).await?;
        self.manager.get_plugin(name).await
    }

    pub async fn load_plugin(&self, name: &str) -> Result<PluginInfo> {
        let handle = self.manager.load_plugin(name).await?;
        let info = handle.info.clone();
        let _ = self
            .plugins
            .write()
            .await
            .insert(name.to_string(), info.clone());
        info!("Registered plugin {} v{}", name, info.version);
        Ok(info)
    }

    /// Loads `names` concurrently and caches the info of every one that loaded.
    /// Failures come back together as an aggregate error.
    pub async fn load_plugins(&self, names: &[String]) -> Result<()> {
        let result = self.manager.load_plugins_concurrently(names).await;

        let mut loaded = Vec::new();
        for name in names {
            if let Some(handle) = self.manager.get_handle(name).await {
                loaded.push((name.clone(), handle.info.clone()));
            }
        }
        self.plugins.write().await.extend(loaded);
        result
    }

    pub async fn unload_plugin(&self, name: &str) -> Result<()> {
        let _ = self.plugins.write().await.remove(name);
        self.manager.unload_plugin(name).await
    }

    /// Info for every plugin loaded through this registry, sorted by name.
    pub async fn list_plugins(&self) -> Vec<PluginInfo> {
        let plugins = self.plugins.read().await;
        let mut names: Vec<&String> = plugins.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| plugins.get(name).cloned())
            .collect()
    }

    pub async fn discover_plugins(&self) -> Result<Vec<String>> {
        self.manager.discover_plugins().await
    }

    pub async fn health_check(&self, name: &str) -> Result<PluginInfo> {
        self.manager.health_check(name).await
    }

    /// Probes every cached plugin; `true` means it answered `GetInfo`.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let names: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        let mut results = HashMap::new();
        for name in names {
            let healthy = match self.manager.health_check(&name).await {
                Ok(_) => true,
                Err(e) => {
                    warn!("Plugin {} failed health check: {}", name, e);
                    false
                }
            };
            let _ = results.insert(name, healthy);
        }
        results
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down plugin registry");
        self.plugins.write().await.clear();
        self.manager.shutdown().await
    }

    pub async fn get_stats(&self) -> RegistryStats {
        RegistryStats {
            loaded_plugins: self.plugins.read().await.len(),
            manager: self.manager.get_stats().await,
        }
    }
}
