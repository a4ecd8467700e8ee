use crate::config::LoggingConfig;
use anyhow::Context;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

type FilterLayer = reload::Layer<EnvFilter, Registry>;
type Output = Box<dyn Layer<Layered<FilterLayer, Registry>> + Send + Sync>;

fn directive(level: &str) -> String {
    format!("zeroui_plugin_host={}", level)
}

/// Changes the host's log level while it runs.
#[derive(Clone)]
pub struct LogLevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    pub fn new(handle: reload::Handle<EnvFilter, Registry>) -> Self {
        Self { handle }
    }

    /// Accepts `trace`, `debug`, `info`, `warn`, `error` or `off`.
    pub fn set_level(&self, level: &str) -> anyhow::Result<()> {
        let level: LevelFilter = level
            .trim()
            .parse()
            .with_context(|| format!("Unknown log level {:?}", level))?;
        let filter = EnvFilter::new(directive(&level.to_string().to_lowercase()));
        self.handle
            .reload(filter)
            .context("Failed to apply log level")?;
        tracing::info!("Log level set to {}", level);
        Ok(())
    }

    /// The active filter directives.
    pub fn current(&self) -> Option<String> {
        self.handle.with_current(|filter| filter.to_string()).ok()
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured level
/// until the level is changed through the returned handle.
pub fn init(config: &LoggingConfig, debug: bool) -> anyhow::Result<LogLevelHandle> {
    let level = if debug { "debug" } else { config.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)));
    let (filter, handle) = reload::Layer::new(filter);

    let file = match &config.file {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?,
        ),
        None => None,
    };

    let output: Output = match (config.json, file) {
        (true, Some(file)) => fmt::layer()
            .json()
            .with_target(false)
            .with_writer(Mutex::new(file))
            .boxed(),
        (true, None) => fmt::layer().json().with_target(false).boxed(),
        (false, Some(file)) => fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .boxed(),
        (false, None) => fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(LogLevelHandle::new(handle))
}
