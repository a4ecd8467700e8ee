use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `ZEROUI__HEALTH__INTERVAL_SECS=10`.
pub const ENV_PREFIX: &str = "ZEROUI";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "default_plugin_dir")]
    pub dir: PathBuf,
    /// Binaries are named `<binary_prefix>-<name>`
    #[serde(default = "default_binary_prefix")]
    pub binary_prefix: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Defaults to the number of available CPU cores
    #[serde(default)]
    pub max_concurrent_loads: Option<usize>,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("./plugins")
}

fn default_binary_prefix() -> String {
    "zeroui-plugin".to_string()
}

fn default_api_version() -> String {
    crate::plugin::CURRENT_API_VERSION.to_string()
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_call_timeout() -> u64 {
    5
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugin_dir(),
            binary_prefix: default_binary_prefix(),
            api_version: default_api_version(),
            max_concurrent_loads: None,
            startup_timeout_secs: default_startup_timeout(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl PluginsConfig {
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_loads
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    #[serde(default = "default_magic_cookie_key")]
    pub magic_cookie_key: String,
    #[serde(default = "default_magic_cookie_value")]
    pub magic_cookie_value: String,
}

fn default_protocol_version() -> u32 {
    1
}

fn default_magic_cookie_key() -> String {
    "ZEROUI_PLUGIN".to_string()
}

fn default_magic_cookie_value() -> String {
    "zeroui-config-plugin".to_string()
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            magic_cookie_key: default_magic_cookie_key(),
            magic_cookie_value: default_magic_cookie_value(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_wait_poll_interval")]
    pub wait_poll_interval_ms: u64,
    #[serde(default = "default_restart_queue_capacity")]
    pub restart_queue_capacity: usize,
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_wait_poll_interval() -> u64 {
    100
}

fn default_restart_queue_capacity() -> usize {
    32
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            timeout_secs: default_health_timeout(),
            failure_threshold: default_failure_threshold(),
            wait_poll_interval_ms: default_wait_poll_interval(),
            restart_queue_capacity: default_restart_queue_capacity(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
    /// Pause between tearing down the old process and starting the new one
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,
}

fn default_start_timeout() -> u64 {
    5
}

fn default_restart_delay() -> u64 {
    100
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_timeout_secs: default_start_timeout(),
            restart_delay_ms: default_restart_delay(),
        }
    }
}

impl LifecycleConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

impl HostConfig {
    /// Loads a TOML file and applies `ZEROUI__SECTION__KEY` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let config: HostConfig = settings
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document without consulting the environment.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(content).context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.plugins.binary_prefix.is_empty() {
            anyhow::bail!("plugins.binary_prefix must not be empty");
        }
        if self.plugins.api_version.is_empty() {
            anyhow::bail!("plugins.api_version must not be empty");
        }
        if self.handshake.magic_cookie_key.is_empty() || self.handshake.magic_cookie_value.is_empty()
        {
            anyhow::bail!("handshake magic cookie key and value must be set");
        }
        if self.health.failure_threshold == 0 {
            anyhow::bail!("health.failure_threshold must be at least 1");
        }
        if self.health.interval_secs == 0 {
            anyhow::bail!("health.interval_secs must be at least 1");
        }
        if self.health.timeout_secs == 0 {
            anyhow::bail!("health.timeout_secs must be at least 1");
        }
        if self.health.wait_poll_interval_ms == 0 {
            anyhow::bail!("health.wait_poll_interval_ms must be at least 1");
        }
        if self.plugins.call_timeout_secs == 0 || self.plugins.startup_timeout_secs == 0 {
            anyhow::bail!("plugins.call_timeout_secs and plugins.startup_timeout_secs must be at least 1");
        }
        if self.lifecycle.start_timeout_secs == 0 {
            anyhow::bail!("lifecycle.start_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    pub fn default_config() -> Self {
        Self::default()
    }
}
