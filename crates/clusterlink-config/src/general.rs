use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    #[serde(alias = "kubeconfig-path")]
    pub kubeconfig_path: String,
}

impl GeneralConfig {
    /// The stored kubeconfig setting, or `None` when it is blank.
    pub fn stored_kubeconfig(&self) -> Option<&str> {
        let trimmed = self.kubeconfig_path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub binary: String,
    pub args: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { binary: "kubectl".into(), args: vec!["proxy".into(), "--port=0".into()] }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(alias = "file-poll-interval-ms")]
    pub file_poll_interval_ms: u64,
    #[serde(alias = "reconcile-interval-secs")]
    pub reconcile_interval_secs: u64,
    #[serde(alias = "watch-retry-ms")]
    pub watch_retry_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { file_poll_interval_ms: 1000, reconcile_interval_secs: 3600, watch_retry_ms: 1000 }
    }
}
