// ZeroUI plugin host library

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod plugin;
pub mod rpc;
pub mod transport;
pub mod util;

pub use crate::config::HostConfig;
pub use crate::core::{HealthMonitor, Orchestrator, PluginLifecycle, PluginManager, PluginState};
pub use crate::error::{AggregateError, ErrorCategory, PluginError, Result};
pub use crate::plugin::{ConfigPlugin, PluginInfo, Registry};
