// Process launcher tests against shell-script "plugins"

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;
    use zeroui_plugin_host::config::HandshakeConfig;
    use zeroui_plugin_host::transport::{PluginLauncher, ProcessLauncher};
    use zeroui_plugin_host::{ErrorCategory, PluginError};

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(format!("zeroui-plugin-{}", name));
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn launcher() -> ProcessLauncher {
        ProcessLauncher::new(HandshakeConfig::default(), Duration::from_secs(2))
    }

    async fn launch_err(name: &str, body: &str) -> PluginError {
        let dir = TempDir::new().unwrap();
        let path = script(dir.path(), name, body);
        match launcher().launch(name, &path).await {
            Ok(_) => panic!("{} should have been rejected", name),
            Err(e) => e,
        }
    }

    #[tokio::test]
    async fn test_non_plugin_binary_is_rejected() {
        let err = launch_err("chatty", "echo 'This binary is a plugin. These are not meant to be executed directly.'\nsleep 30").await;
        assert!(matches!(err, PluginError::Handshake { .. }));
        assert_eq!(err.category(), ErrorCategory::Handshake);
    }

    #[tokio::test]
    async fn test_exit_before_handshake() {
        let err = launch_err("quitter", "exit 1").await;
        match err {
            PluginError::Handshake { reason, .. } => assert!(reason.contains("exited")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_netrpc_plugin_is_rejected() {
        let err = launch_err("legacy", "echo '1|1|tcp|127.0.0.1:10001'\nsleep 30").await;
        match err {
            PluginError::Handshake { reason, .. } => assert!(reason.contains("only gRPC")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_protocol_version_is_rejected() {
        let err = launch_err("future", "echo '1|7|tcp|127.0.0.1:10001|grpc'\nsleep 30").await;
        match err {
            PluginError::Handshake { reason, .. } => assert!(reason.contains("protocol version 7")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_plugin_times_out() {
        let dir = TempDir::new().unwrap();
        let path = script(dir.path(), "silent", "sleep 30");
        let launcher = ProcessLauncher::new(HandshakeConfig::default(), Duration::from_millis(200));

        let err = launcher.launch("silent", &path).await.err().unwrap();
        match err {
            PluginError::Handshake { reason, .. } => assert!(reason.contains("no handshake")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    /// True while `pid` exists and is not a zombie.
    fn running(pid: i32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid), None).is_err() {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn test_failed_launch_kills_forked_children() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("forked.pid");
        let body = format!("sleep 300 &\necho $! > {}\nexit 1", pid_file.display());
        let path = script(dir.path(), "forker", &body);
        let launcher = ProcessLauncher::new(HandshakeConfig::default(), Duration::from_millis(500));

        assert!(launcher.launch("forker", &path).await.is_err());

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut waited = Duration::ZERO;
        while running(pid) {
            assert!(waited < Duration::from_secs(5), "forked sleep {} survived", pid);
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
    }

    #[tokio::test]
    async fn test_environment_reaches_plugin_and_dead_socket_fails() {
        // Only answers when the host passed the cookie and protocol version.
        let body = r#"[ "$ZEROUI_PLUGIN" = "zeroui-config-plugin" ] || exit 3
echo "1|$PLUGIN_PROTOCOL_VERSIONS|unix|/nonexistent/zeroui-test.sock|grpc"
sleep 30"#;
        let dir = TempDir::new().unwrap();
        let path = script(dir.path(), "socket", body);
        let launcher = ProcessLauncher::new(HandshakeConfig::default(), Duration::from_millis(500));

        let err = launcher.launch("socket", &path).await.err().unwrap();
        // Handshake accepted; only the connection fails.
        let connect_failed = matches!(err, PluginError::Transport { .. })
            || err.to_string().contains("could not connect");
        assert!(connect_failed, "unexpected error {:?}", err);
        assert_eq!(err.category(), ErrorCategory::Handshake);
    }
}
