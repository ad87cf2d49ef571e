use super::*;

#[test]
fn default_config_has_expected_intervals() {
    let config = AppConfig::default();
    assert_eq!(config.file_poll_interval(), Duration::from_secs(1));
    assert_eq!(config.reconcile_interval(), Duration::from_secs(3600));
    assert_eq!(config.watch_retry_base(), Duration::from_secs(1));
}

#[test]
fn default_proxy_runs_kubectl_on_ephemeral_port() {
    let config = AppConfig::default();
    assert_eq!(config.proxy.binary, "kubectl");
    assert_eq!(config.proxy.args, vec!["proxy".to_string(), "--port=0".to_string()]);
}

#[test]
fn default_stored_kubeconfig_is_unset() {
    let config = AppConfig::default();
    assert!(config.general.stored_kubeconfig().is_none());
}

#[test]
fn blank_stored_kubeconfig_is_treated_as_unset() {
    let general = GeneralConfig { kubeconfig_path: "   ".into() };
    assert!(general.stored_kubeconfig().is_none());
}

#[test]
fn stored_kubeconfig_is_trimmed() {
    let general = GeneralConfig { kubeconfig_path: "  /etc/kube/admin.conf \n".into() };
    assert_eq!(general.stored_kubeconfig(), Some("/etc/kube/admin.conf"));
}

#[test]
fn parse_general_from_toml() {
    let raw = r#"
[general]
kubeconfig_path = "/tmp/kc"
"#;
    let config: AppConfig = toml::from_str(raw).unwrap();
    assert_eq!(config.general.kubeconfig_path, "/tmp/kc");
    assert_eq!(config.orchestrator.file_poll_interval_ms, 1000);
}

#[test]
fn kebab_case_aliases_are_accepted() {
    let raw = r#"
[general]
kubeconfig-path = "/tmp/kc"

[orchestrator]
file-poll-interval-ms = 250
reconcile-interval-secs = 60
watch-retry-ms = 20
"#;
    let config: AppConfig = toml::from_str(raw).unwrap();
    assert_eq!(config.general.kubeconfig_path, "/tmp/kc");
    assert_eq!(config.file_poll_interval(), Duration::from_millis(250));
    assert_eq!(config.reconcile_interval(), Duration::from_secs(60));
    assert_eq!(config.watch_retry_base(), Duration::from_millis(20));
}

#[test]
fn partial_toml_only_proxy_binary_keeps_default_args() {
    let mut base = AppConfig::default();
    let user: AppConfig = toml::from_str(
        r#"
[proxy]
binary = "/opt/bin/kubectl"
args = []
"#,
    )
    .unwrap();
    base.merge(user);

    assert_eq!(base.proxy.binary, "/opt/bin/kubectl");
    assert_eq!(base.proxy.args, vec!["proxy".to_string(), "--port=0".to_string()]);
}

#[test]
fn zero_intervals_are_clamped() {
    let mut config = AppConfig::default();
    config.orchestrator.file_poll_interval_ms = 0;
    config.orchestrator.reconcile_interval_secs = 0;
    assert_eq!(config.file_poll_interval(), Duration::from_millis(1));
    assert_eq!(config.reconcile_interval(), Duration::from_secs(1));
}

#[test]
fn embedded_defaults_parse() {
    let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
    assert_eq!(config.orchestrator.reconcile_interval_secs, 3600);
}

#[test]
fn save_and_load_from_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = AppConfig::default();
    config.general.kubeconfig_path = "/srv/kube/config".into();
    config.orchestrator.file_poll_interval_ms = 500;
    config.save(&path).unwrap();

    let loaded = AppConfig::load_from(&path).unwrap();
    assert_eq!(loaded.general.kubeconfig_path, "/srv/kube/config");
    assert_eq!(loaded.orchestrator.file_poll_interval_ms, 500);
}

#[test]
fn load_from_rejects_invalid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[general\nkubeconfig_path = ").unwrap();
    assert!(AppConfig::load_from(&path).is_err());
}

#[test]
fn load_from_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}
