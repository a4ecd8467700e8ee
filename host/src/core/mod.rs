pub mod health;
pub mod lifecycle;
pub mod manager;
pub mod orchestrator;

pub use health::{HealthCheck, HealthMonitor, HealthStatus};
pub use lifecycle::{LifecycleInfo, LifecycleRegistry, PluginLifecycle, PluginState, TransitionGuard};
pub use manager::{ManagerStats, PluginHandle, PluginManager};
pub use orchestrator::Orchestrator;
