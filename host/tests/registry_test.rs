// Integration tests for the plugin registry

mod common;

#[cfg(test)]
mod tests {
    use super::common::{self, FakeLauncher};
    use std::sync::Arc;
    use zeroui_plugin_host::plugin::CallContext;
    use zeroui_plugin_host::{ConfigPlugin, ErrorCategory, PluginError, Registry};

    fn registry(names: &[&str]) -> (tempfile::TempDir, Arc<FakeLauncher>, Registry) {
        let dir = common::plugin_dir(names);
        let launcher = FakeLauncher::new();
        let manager = common::manager(dir.path(), &launcher, 4);
        (dir, launcher, Registry::new(manager))
    }

    #[tokio::test]
    async fn test_get_plugin_loads_on_demand() {
        let (_dir, launcher, registry) = registry(&["ghostty"]);
        assert!(registry.list_plugins().await.is_empty());

        let plugin = registry.get_plugin("ghostty").await.unwrap();
        let ctx = CallContext::with_timeout(std::time::Duration::from_secs(1));
        let location = plugin.detect_config(&ctx).await.unwrap();
        assert!(location.discovered);

        let again = registry.get_plugin("ghostty").await.unwrap();
        assert!(Arc::ptr_eq(&plugin, &again));
        assert_eq!(launcher.log.spawns(), 1);

        let listed = registry.list_plugins().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "ghostty");
    }

    #[tokio::test]
    async fn test_errors_name_plugin_and_cause() {
        let (_dir, launcher, registry) = registry(&["old", "junk"]);
        launcher.set_api_version("old", "v2.0.0");
        launcher.break_plugin("junk");

        let missing = registry.get_plugin("absent").await.err().unwrap();
        assert_eq!(missing.category(), ErrorCategory::Discovery);
        assert!(missing.to_string().contains("absent"));

        let old = registry.get_plugin("old").await.err().unwrap();
        assert!(matches!(old, PluginError::VersionMismatch { .. }));
        assert!(old.to_string().contains("old"));

        let junk = registry.get_plugin("junk").await.err().unwrap();
        assert!(matches!(junk, PluginError::Handshake { .. }));

        assert!(registry.list_plugins().await.is_empty());
        assert_eq!(launcher.log.live("old"), 0);
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_tracks_unload() {
        let (_dir, _launcher, registry) = registry(&["zed", "alacritty", "kitty"]);
        for name in ["zed", "alacritty", "kitty"] {
            registry.load_plugin(name).await.unwrap();
        }

        let names: Vec<String> = registry
            .list_plugins()
            .await
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["alacritty", "kitty", "zed"]);

        registry.unload_plugin("kitty").await.unwrap();
        assert_eq!(registry.list_plugins().await.len(), 2);
        assert_eq!(registry.get_stats().await.manager.loaded_names, vec!["alacritty", "zed"]);
    }

    #[tokio::test]
    async fn test_bulk_load_caches_successes() {
        let (_dir, _launcher, registry) = registry(&["a", "c"]);

        let err = registry
            .load_plugins(&common::names(&["a", "b", "c"]))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Aggregate(_)));
        assert_eq!(registry.list_plugins().await.len(), 2);
    }

    #[tokio::test]
    async fn test_health_check_all_and_shutdown() {
        let (_dir, launcher, registry) = registry(&["a", "b"]);
        assert_eq!(registry.discover_plugins().await.unwrap(), vec!["a", "b"]);
        registry.get_plugin("a").await.unwrap();
        registry.get_plugin("b").await.unwrap();

        launcher.fail_probes("b", 1);
        let results = registry.health_check_all().await;
        assert_eq!(results["a"], true);
        assert_eq!(results["b"], false);
        assert!(registry.health_check("b").await.is_ok());

        let stats = registry.get_stats().await;
        assert_eq!(stats.loaded_plugins, 2);
        assert_eq!(stats.manager.active_processes, 2);

        registry.shutdown().await.unwrap();
        assert!(registry.list_plugins().await.is_empty());
        assert_eq!(registry.get_stats().await.manager.loaded_plugins, 0);
        assert_eq!(launcher.log.live("a") + launcher.log.live("b"), 0);
    }
}
