// Integration tests for the health monitor

mod common;

#[cfg(test)]
mod tests {
    use super::common::{self, FakeLauncher};
    use std::sync::Arc;
    use std::time::Duration;
    use zeroui_plugin_host::core::{HealthMonitor, HealthStatus, PluginManager};
    use zeroui_plugin_host::PluginError;

    async fn monitored(
        names: &[&str],
        threshold: u32,
    ) -> (tempfile::TempDir, Arc<FakeLauncher>, Arc<PluginManager>, Arc<HealthMonitor>) {
        let dir = common::plugin_dir(names);
        let launcher = FakeLauncher::new();
        let manager = common::manager(dir.path(), &launcher, 4);
        manager
            .load_plugins_concurrently(&common::names(names))
            .await
            .unwrap();
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&manager),
            common::health_config(threshold),
        ));
        (dir, launcher, manager, monitor)
    }

    fn restart_requests(manager: &PluginManager) -> u64 {
        manager.metrics().snapshot().restart_requests_total
    }

    #[tokio::test]
    async fn test_successful_probe_records_health() {
        let (_dir, _launcher, _manager, monitor) = monitored(&["a", "b"], 3).await;

        monitor.check_all_plugins().await;

        let all = monitor.get_all_health();
        assert_eq!(all.len(), 2);
        let check = monitor.get_health("a").unwrap();
        assert_eq!(check.status, HealthStatus::Healthy);
        assert_eq!(check.consecutive_failures, 0);
        assert!(check.last_check.is_some());
        assert!(check.last_response_latency.is_some());
        assert_eq!(check.metadata["name"], "a");
        assert!(monitor.is_healthy("b"));
    }

    #[tokio::test]
    async fn test_threshold_breach_requests_exactly_one_restart() {
        let (_dir, launcher, manager, monitor) = monitored(&["a"], 3).await;
        launcher.fail_probes("a", 100);

        for _ in 0..2 {
            monitor.check_all_plugins().await;
        }
        assert_eq!(restart_requests(&manager), 0);
        assert_eq!(monitor.get_health("a").unwrap().status, HealthStatus::Unknown);

        monitor.check_all_plugins().await;
        assert_eq!(restart_requests(&manager), 1);
        let check = monitor.get_health("a").unwrap();
        assert_eq!(check.status, HealthStatus::Unhealthy);
        // Reset as soon as the restart was queued
        assert_eq!(check.consecutive_failures, 0);
        assert!(check.last_error.unwrap().contains("wedged"));

        // The worker is not running, so the request stays pending and a
        // second breach is not queued again.
        for _ in 0..3 {
            monitor.check_all_plugins().await;
        }
        assert_eq!(restart_requests(&manager), 1);
    }

    #[tokio::test]
    async fn test_interleaved_success_resets_counter() {
        let (_dir, launcher, manager, monitor) = monitored(&["a"], 3).await;

        launcher.fail_probes("a", 2);
        monitor.check_all_plugins().await;
        monitor.check_all_plugins().await;
        assert_eq!(monitor.get_health("a").unwrap().consecutive_failures, 2);

        monitor.check_all_plugins().await;
        assert_eq!(monitor.get_health("a").unwrap().consecutive_failures, 0);
        assert!(monitor.is_healthy("a"));

        launcher.fail_probes("a", 2);
        monitor.check_all_plugins().await;
        monitor.check_all_plugins().await;

        assert_eq!(monitor.get_health("a").unwrap().consecutive_failures, 2);
        assert_eq!(restart_requests(&manager), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_plugin_counts_as_failure() {
        let (_dir, launcher, manager, monitor) = monitored(&["a", "b"], 3).await;
        launcher.stall_info_calls("a", 1);

        // A hung plugin must not hold up the tick.
        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(10), monitor.check_all_plugins()).await
        );

        let check = monitor.get_health("a").unwrap();
        assert_eq!(check.consecutive_failures, 1);
        assert_eq!(check.status, HealthStatus::Unknown);
        assert!(check.last_error.unwrap().contains("timed out"));
        assert!(monitor.is_healthy("b"));
        assert_eq!(manager.metrics().snapshot().health_check_failures_total, 1);

        monitor.check_all_plugins().await;
        assert!(monitor.is_healthy("a"));
    }

    #[tokio::test]
    async fn test_restart_worker_replaces_unhealthy_plugin() {
        let (_dir, launcher, manager, monitor) = monitored(&["a"], 2).await;
        monitor.start();

        launcher.fail_probes("a", 2);
        monitor.check_all_plugins().await;
        monitor.check_all_plugins().await;

        let lifecycle = manager.lifecycle("a").unwrap();
        let mut waited = Duration::ZERO;
        while lifecycle.restart_count() == 0 || !lifecycle.is_running() {
            assert!(waited < Duration::from_secs(5), "restart never happened");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        // The worker records its outcome right after the restart returns.
        while monitor.get_health("a").unwrap().status != HealthStatus::Starting {
            assert!(waited < Duration::from_secs(5), "status never updated");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }

        assert_eq!(launcher.log.spawns(), 2);
        assert_eq!(launcher.log.max_live("a"), 1);
        assert_eq!(manager.metrics().snapshot().restarts_total, 1);

        monitor.check_all_plugins().await;
        assert!(monitor.is_healthy("a"));

        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_failed_restart_is_reported_not_retried() {
        let (_dir, launcher, manager, monitor) = monitored(&["a"], 1).await;
        monitor.start();

        launcher.break_plugin("a");
        launcher.fail_probes("a", 1);
        monitor.check_all_plugins().await;

        let mut waited = Duration::ZERO;
        while manager.metrics().snapshot().restart_failures_total == 0 {
            assert!(waited < Duration::from_secs(5), "restart never attempted");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let check = monitor.get_health("a").unwrap();
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert!(check.last_error.is_some());
        assert_eq!(manager.metrics().snapshot().restarts_total, 0);
        assert_eq!(manager.metrics().snapshot().restart_failures_total, 1);
        assert!(!manager.lifecycle("a").unwrap().is_running());

        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_restart_unhealthy_only_touches_failing_plugins() {
        let (_dir, launcher, manager, monitor) = monitored(&["a", "b", "c"], 3).await;
        launcher.fail_probes("a", 1);
        monitor.check_all_plugins().await;
        assert!(!monitor.is_healthy("a"));

        monitor.restart_unhealthy().await.unwrap();

        assert_eq!(launcher.log.spawns(), 4);
        assert_eq!(launcher.log.max_live("a"), 1);
        assert_eq!(manager.lifecycle("a").unwrap().restart_count(), 1);
        assert_eq!(manager.lifecycle("b").unwrap().restart_count(), 0);
        assert_eq!(monitor.get_health("a").unwrap().status, HealthStatus::Starting);

        monitor.check_all_plugins().await;
        assert!(monitor.is_healthy("a"));
    }

    #[tokio::test]
    async fn test_restart_unhealthy_aggregates_failures() {
        let (_dir, launcher, manager, monitor) = monitored(&["a", "b"], 3).await;
        launcher.break_plugin("b");
        launcher.fail_probes("b", 1);
        monitor.check_all_plugins().await;

        let err = monitor.restart_unhealthy().await.unwrap_err();
        let aggregate = match err {
            PluginError::Aggregate(aggregate) => aggregate,
            other => panic!("expected aggregate error, got {:?}", other),
        };
        assert_eq!(aggregate.names(), vec!["b"]);
        assert_eq!(
            aggregate.get("b").map(PluginError::category),
            Some(zeroui_plugin_host::ErrorCategory::Restart)
        );

        assert_eq!(monitor.get_health("b").unwrap().status, HealthStatus::Unhealthy);
        assert_eq!(manager.lifecycle("a").unwrap().restart_count(), 0);
        assert_eq!(launcher.log.live("b"), 0);
    }

    #[tokio::test]
    async fn test_wait_for_healthy() {
        let (_dir, _launcher, _manager, monitor) = monitored(&["a"], 3).await;
        monitor.check_all_plugins().await;

        monitor
            .wait_for_healthy("a", Duration::from_secs(1))
            .await
            .unwrap();

        let err = monitor
            .wait_for_healthy("missing", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::HealthTimeout { .. }));
    }

    #[tokio::test]
    async fn test_start_twice_and_stop() {
        let (_dir, _launcher, _manager, monitor) = monitored(&["a"], 3).await;
        monitor.start();
        monitor.start();
        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), monitor.stop()).await
        );
    }
}
