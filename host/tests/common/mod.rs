// Shared fakes for the plugin host integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use zeroui_plugin_host::config::{HealthConfig, LifecycleConfig, PluginsConfig};
use zeroui_plugin_host::core::PluginManager;
use zeroui_plugin_host::metrics::PluginMetrics;
use zeroui_plugin_host::plugin::{
    CallContext, ConfigData, ConfigLocation, ConfigMetadata, PluginInfo, CURRENT_API_VERSION,
};
use zeroui_plugin_host::transport::{LaunchedPlugin, PluginLauncher, PluginProcess, ProcessHandle};
use zeroui_plugin_host::{ConfigPlugin, PluginError, Result};

pub const PREFIX: &str = "zeroui-plugin";

/// Spawn/kill bookkeeping used to check process invariants.
#[derive(Default)]
pub struct SpawnLog {
    live: Mutex<HashMap<String, usize>>,
    max_live: Mutex<HashMap<String, usize>>,
    spawns: AtomicUsize,
    kills: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SpawnLog {
    pub fn live(&self, name: &str) -> usize {
        self.live.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// Most processes ever alive at once under `name`.
    pub fn max_live(&self, name: &str) -> usize {
        self.max_live.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn spawned(&self, name: &str) {
        let mut live = self.live.lock().unwrap();
        let count = live.entry(name.to_string()).or_insert(0);
        *count += 1;
        let mut max_live = self.max_live.lock().unwrap();
        let max = max_live.entry(name.to_string()).or_insert(0);
        *max = (*max).max(*count);
        self.spawns.fetch_add(1, Ordering::SeqCst);
    }

    fn killed(&self, name: &str) {
        let mut live = self.live.lock().unwrap();
        if let Some(count) = live.get_mut(name) {
            *count -= 1;
        }
        self.kills.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeProcess {
    name: String,
    log: Arc<SpawnLog>,
    exited: bool,
}

#[async_trait]
impl PluginProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn kill(&mut self) -> Result<()> {
        if !self.exited {
            self.exited = true;
            self.log.killed(&self.name);
        }
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        self.exited
    }
}

/// In-process stand-in for a plugin binary.
pub struct FakePlugin {
    name: String,
    api_version: String,
    failing_probes: Arc<Mutex<HashMap<String, u32>>>,
    stalled_calls: Arc<Mutex<HashMap<String, u32>>>,
    unimplemented: bool,
}

fn take_one(counts: &Mutex<HashMap<String, u32>>, name: &str) -> bool {
    let mut counts = counts.lock().unwrap();
    match counts.get_mut(name) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl ConfigPlugin for FakePlugin {
    async fn get_info(&self, _ctx: &CallContext) -> Result<PluginInfo> {
        if self.unimplemented {
            return Err(PluginError::Rpc(tonic::Status::unimplemented(
                "unknown service proto.ConfigPlugin",
            )));
        }
        // Ignores the caller's deadline on purpose.
        if take_one(&self.stalled_calls, &self.name) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if take_one(&self.failing_probes, &self.name) {
            return Err(PluginError::Rpc(tonic::Status::unavailable("plugin is wedged")));
        }
        Ok(PluginInfo {
            name: self.name.clone(),
            version: "1.0.0".to_string(),
            api_version: self.api_version.clone(),
            ..Default::default()
        })
    }

    async fn detect_config(&self, _ctx: &CallContext) -> Result<ConfigLocation> {
        Ok(ConfigLocation {
            path: format!("/tmp/{}.conf", self.name),
            format: "toml".to_string(),
            discovered: true,
            ..Default::default()
        })
    }

    async fn parse_config(&self, _ctx: &CallContext, _path: &str) -> Result<ConfigData> {
        Ok(ConfigData::default())
    }

    async fn write_config(&self, _ctx: &CallContext, _path: &str, _data: &ConfigData) -> Result<()> {
        Ok(())
    }

    async fn validate_field(
        &self,
        _ctx: &CallContext,
        _field: &str,
        _value: &serde_json::Value,
    ) -> Result<()> {
        Ok(())
    }

    async fn validate_config(&self, _ctx: &CallContext, _data: &ConfigData) -> Result<()> {
        Ok(())
    }

    async fn get_schema(&self, _ctx: &CallContext) -> Result<ConfigMetadata> {
        Ok(ConfigMetadata::default())
    }

    async fn supports_feature(&self, _ctx: &CallContext, _feature: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Launcher that hands out [`FakePlugin`]s and records every spawn and kill.
#[derive(Default)]
pub struct FakeLauncher {
    pub log: Arc<SpawnLog>,
    api_versions: Mutex<HashMap<String, String>>,
    failing_probes: Arc<Mutex<HashMap<String, u32>>>,
    stalled_calls: Arc<Mutex<HashMap<String, u32>>>,
    unimplemented: Mutex<HashSet<String>>,
    broken: Mutex<HashSet<String>>,
    launch_delay: Mutex<Duration>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_api_version(&self, name: &str, version: &str) {
        self.api_versions
            .lock()
            .unwrap()
            .insert(name.to_string(), version.to_string());
    }

    /// The next `count` GetInfo calls to any instance of `name` fail.
    pub fn fail_probes(&self, name: &str, count: u32) {
        self.failing_probes
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
    }

    /// The next `count` GetInfo calls to `name` never answer.
    pub fn stall_info_calls(&self, name: &str, count: u32) {
        self.stalled_calls
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
    }

    /// `name` answers the handshake but serves some other gRPC service.
    pub fn serve_wrong_service(&self, name: &str) {
        self.unimplemented.lock().unwrap().insert(name.to_string());
    }

    /// Launching `name` fails the way a binary without the handshake would.
    pub fn break_plugin(&self, name: &str) {
        self.broken.lock().unwrap().insert(name.to_string());
    }

    pub fn set_launch_delay(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl PluginLauncher for FakeLauncher {
    async fn launch(&self, name: &str, _binary: &Path) -> Result<LaunchedPlugin> {
        let in_flight = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.launch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.broken.lock().unwrap().contains(name) {
            return Err(PluginError::Handshake {
                name: name.to_string(),
                reason: "unrecognized handshake line".to_string(),
            });
        }

        self.log.spawned(name);
        let api_version = self
            .api_versions
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| CURRENT_API_VERSION.to_string());

        Ok(LaunchedPlugin {
            process: ProcessHandle::new(Box::new(FakeProcess {
                name: name.to_string(),
                log: Arc::clone(&self.log),
                exited: false,
            })),
            client: Arc::new(FakePlugin {
                name: name.to_string(),
                api_version,
                failing_probes: Arc::clone(&self.failing_probes),
                stalled_calls: Arc::clone(&self.stalled_calls),
                unimplemented: self.unimplemented.lock().unwrap().contains(name),
            }),
        })
    }
}

/// A plugin directory holding an empty binary for each name.
pub fn plugin_dir(names: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for name in names {
        std::fs::write(dir.path().join(format!("{}-{}", PREFIX, name)), b"").unwrap();
    }
    dir
}

pub fn plugins_config(dir: &Path, max_concurrent_loads: usize) -> PluginsConfig {
    PluginsConfig {
        dir: dir.to_path_buf(),
        binary_prefix: PREFIX.to_string(),
        api_version: CURRENT_API_VERSION.to_string(),
        max_concurrent_loads: Some(max_concurrent_loads),
        startup_timeout_secs: 5,
        call_timeout_secs: 2,
    }
}

pub fn lifecycle_config() -> LifecycleConfig {
    LifecycleConfig {
        start_timeout_secs: 2,
        restart_delay_ms: 5,
    }
}

pub fn health_config(failure_threshold: u32) -> HealthConfig {
    HealthConfig {
        // Long enough that the ticker never fires during a test
        interval_secs: 3600,
        timeout_secs: 1,
        failure_threshold,
        wait_poll_interval_ms: 10,
        restart_queue_capacity: 8,
    }
}

pub fn manager(dir: &Path, launcher: &Arc<FakeLauncher>, max_concurrent_loads: usize) -> Arc<PluginManager> {
    let launcher: Arc<dyn PluginLauncher> = Arc::clone(launcher) as Arc<dyn PluginLauncher>;
    Arc::new(PluginManager::new(
        plugins_config(dir, max_concurrent_loads),
        lifecycle_config(),
        launcher,
        Arc::new(PluginMetrics::new()),
    ))
}

pub fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
