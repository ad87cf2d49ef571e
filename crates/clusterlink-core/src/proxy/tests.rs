use super::*;

#[test]
fn parses_kubectl_banner() {
    assert_eq!(parse_bound_port("Starting to serve on 127.0.0.1:38211"), Some(38211));
}

#[test]
fn parses_hostnames_and_ipv6() {
    assert_eq!(parse_bound_port("serving on localhost:8001"), Some(8001));
    assert_eq!(parse_bound_port("listening on [::1]:9443"), Some(9443));
}

#[test]
fn ignores_lines_without_a_port() {
    assert_eq!(parse_bound_port("W0101 proxy warming up"), None);
    assert_eq!(parse_bound_port("https://example.com/path"), None);
    assert_eq!(parse_bound_port("bound 127.0.0.1:0"), None);
    assert_eq!(parse_bound_port("port 127.0.0.1:99999"), None);
}

#[test]
fn command_from_config_keeps_defaults_for_blank_fields() {
    let config = clusterlink_config::ProxyConfig { binary: "  ".into(), args: vec![] };
    assert_eq!(ProxyCommand::from(&config), ProxyCommand::default());

    let config = clusterlink_config::ProxyConfig { binary: "/usr/local/bin/kubectl".into(), args: vec![] };
    let command = ProxyCommand::from(&config);
    assert_eq!(command.program, PathBuf::from("/usr/local/bin/kubectl"));
    assert_eq!(command.args, vec!["proxy".to_string(), "--port=0".to_string()]);
}

#[test]
fn stop_on_fresh_manager_is_a_noop() {
    let mut manager = ProxyProcessManager::new(ProxyCommand::default());
    manager.stop();
    manager.stop();
    assert_eq!(manager.bound_port(), None);
    assert_eq!(manager.pid(), None);
    assert_eq!(manager.state(), ProxyState::Stopped);
}

#[tokio::test]
async fn missing_binary_fails_to_spawn() {
    let mut manager = ProxyProcessManager::new(ProxyCommand {
        program: PathBuf::from("/definitely/not/a/real/proxy-binary"),
        args: vec![],
    });
    let result = manager.start(Path::new("/tmp/kubeconfig")).await;
    assert!(matches!(result, Err(ProxyError::Spawn(_))));
    assert_eq!(manager.bound_port(), None);
    assert_eq!(manager.state(), ProxyState::Failed);
}

#[cfg(unix)]
mod unix {
    use std::time::Duration;

    use super::*;

    fn shell(script: &str) -> ProxyProcessManager {
        ProxyProcessManager::new(ProxyCommand { program: PathBuf::from("sh"), args: vec!["-c".into(), script.into()] })
    }

    async fn start(manager: &mut ProxyProcessManager) -> Outcome {
        tokio::time::timeout(Duration::from_secs(10), manager.start(Path::new("/tmp/kubeconfig-under-test")))
            .await
            .expect("proxy start should settle")
    }

    #[tokio::test]
    async fn resolves_with_port_from_stdout() {
        let mut manager = shell("echo 'Starting to serve on 127.0.0.1:43117'; exec sleep 30");
        assert_eq!(start(&mut manager).await, Ok(43117));
        assert_eq!(manager.bound_port(), Some(43117));
        assert_eq!(manager.state(), ProxyState::Running);
        assert!(manager.pid().is_some());
        manager.stop();
    }

    #[tokio::test]
    async fn stop_twice_clears_port_and_pid() {
        let mut manager = shell("echo 'Starting to serve on 127.0.0.1:43118'; exec sleep 30");
        start(&mut manager).await.unwrap();

        manager.stop();
        manager.stop();
        assert_eq!(manager.bound_port(), None);
        assert_eq!(manager.pid(), None);
        assert_eq!(manager.state(), ProxyState::Stopped);
    }

    #[tokio::test]
    async fn early_exit_rejects() {
        let mut manager = shell("exit 3");
        assert_eq!(start(&mut manager).await, Err(ProxyError::Exited(Some(3))));
        assert_eq!(manager.bound_port(), None);
        assert_eq!(manager.state(), ProxyState::Failed);
    }

    #[tokio::test]
    async fn stderr_output_rejects() {
        let mut manager = shell("echo 'error: no configuration' >&2; exec sleep 30");
        assert_eq!(start(&mut manager).await, Err(ProxyError::Stderr("error: no configuration".into())));
        assert_eq!(manager.bound_port(), None);
        manager.stop();
    }

    #[tokio::test]
    async fn events_after_settlement_are_ignored() {
        let mut manager = shell("echo 'Starting to serve on 127.0.0.1:5000'; echo 'late warning' >&2; exit 1");
        assert_eq!(start(&mut manager).await, Ok(5000));
        manager.stop();
    }

    #[tokio::test]
    async fn kubeconfig_path_is_passed_through_environment() {
        let mut manager = shell("echo \"$KUBECONFIG\" >&2; exec sleep 30");
        assert_eq!(start(&mut manager).await, Err(ProxyError::Stderr("/tmp/kubeconfig-under-test".into())));
        manager.stop();
    }

    #[tokio::test]
    async fn respawn_replaces_previous_session_and_ignores_stale_outcome() {
        let mut manager = shell("echo 'Starting to serve on 127.0.0.1:6001'; exec sleep 30");
        start(&mut manager).await.unwrap();
        let first_generation = manager.current_generation().unwrap();
        let first_pid = manager.pid();

        let pending = manager.spawn(Path::new("/tmp/other")).unwrap();
        assert_ne!(manager.pid(), first_pid);
        assert_eq!(manager.state(), ProxyState::Starting);

        assert!(!manager.complete(first_generation, &Ok(1)));
        assert_eq!(manager.bound_port(), None);

        let generation = pending.generation;
        let outcome = pending.wait().await;
        assert!(manager.complete(generation, &outcome));
        assert_eq!(manager.bound_port(), Some(6001));
        manager.stop();
    }

    #[tokio::test]
    async fn stopping_while_starting_cancels_the_pending_start() {
        let mut manager = shell("exec sleep 30");
        let pending = manager.spawn(Path::new("/tmp/kc")).unwrap();
        manager.stop();
        let outcome = tokio::time::timeout(Duration::from_secs(10), pending.wait()).await.unwrap();
        assert!(matches!(outcome, Err(ProxyError::Cancelled) | Err(ProxyError::Exited(_))));
    }
}
