use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the manager and the health monitor.
#[derive(Debug, Default)]
pub struct PluginMetrics {
    /// Plugins successfully loaded (including restarts)
    loads_total: AtomicU64,
    load_failures_total: AtomicU64,
    unloads_total: AtomicU64,
    restarts_total: AtomicU64,
    restart_failures_total: AtomicU64,
    /// Health probes issued by the monitor
    health_checks_total: AtomicU64,
    health_check_failures_total: AtomicU64,
    /// Threshold breaches that queued a restart
    restart_requests_total: AtomicU64,
}

/// Point-in-time copy of [`PluginMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub loads_total: u64,
    pub load_failures_total: u64,
    pub unloads_total: u64,
    pub restarts_total: u64,
    pub restart_failures_total: u64,
    pub health_checks_total: u64,
    pub health_check_failures_total: u64,
    pub restart_requests_total: u64,
}

impl PluginMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_loads(&self) {
        let _ = self.loads_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_load_failures(&self) {
        let _ = self.load_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_unloads(&self) {
        let _ = self.unloads_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_restarts(&self) {
        let _ = self.restarts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_restart_failures(&self) {
        let _ = self.restart_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_health_checks(&self) {
        let _ = self.health_checks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_health_check_failures(&self) {
        let _ = self.health_check_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_restart_requests(&self) {
        let _ = self.restart_requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_restart_requests_total(&self) -> u64 {
        self.restart_requests_total.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loads_total: self.loads_total.load(Ordering::Relaxed),
            load_failures_total: self.load_failures_total.load(Ordering::Relaxed),
            unloads_total: self.unloads_total.load(Ordering::Relaxed),
            restarts_total: self.restarts_total.load(Ordering::Relaxed),
            restart_failures_total: self.restart_failures_total.load(Ordering::Relaxed),
            health_checks_total: self.health_checks_total.load(Ordering::Relaxed),
            health_check_failures_total: self.health_check_failures_total.load(Ordering::Relaxed),
            restart_requests_total: self.restart_requests_total.load(Ordering::Relaxed),
        }
    }
}
