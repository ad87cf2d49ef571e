pub mod general;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

pub use general::{GeneralConfig, OrchestratorConfig, ProxyConfig};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

pub const DEFAULT_CONFIG: &str = include_str!("defaults.toml");

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded defaults must parse")
    }
}

impl AppConfig {
    /// Defaults merged with the user file at [`AppConfig::default_path`].
    /// A missing file is not an error; an unreadable one is reported and ignored.
    pub fn load() -> Self {
        let path = Self::default_path();
        match read_user_file(&path) {
            Ok(Some(user)) => Self::default().merged_with(user),
            Ok(None) => Self::default(),
            Err(e) => {
                eprintln!("Warning: ignoring config at {}: {e:#}", path.display());
                Self::default()
            }
        }
    }

    /// Like [`AppConfig::load`] but for an explicit file, which must exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let user = read_user_file(path)?.ok_or_else(|| anyhow::anyhow!("{} does not exist", path.display()))?;
        Ok(Self::default().merged_with(user))
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("clusterlink").join("config.toml")
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        write_creating_parent(path, &toml::to_string_pretty(self)?)
    }

    /// Writes the commented defaults to [`AppConfig::default_path`] unless a
    /// file is already there.
    pub fn init_default() -> anyhow::Result<PathBuf> {
        let path = Self::default_path();
        anyhow::ensure!(!path.exists(), "Config already exists at {}", path.display());
        write_creating_parent(&path, DEFAULT_CONFIG)?;
        Ok(path)
    }

    fn merged_with(mut self, user: AppConfig) -> Self {
        self.merge(user);
        self
    }

    fn merge(&mut self, user: AppConfig) {
        self.general = user.general;
        self.orchestrator = user.orchestrator;

        // An empty args list in a user file means "keep the default arguments".
        let args = if user.proxy.args.is_empty() { std::mem::take(&mut self.proxy.args) } else { user.proxy.args };
        self.proxy = ProxyConfig { binary: user.proxy.binary, args };
    }

    pub fn file_poll_interval(&self) -> Duration {
        Duration::from_millis(self.orchestrator.file_poll_interval_ms.max(1))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.orchestrator.reconcile_interval_secs.max(1))
    }

    pub fn watch_retry_base(&self) -> Duration {
        Duration::from_millis(self.orchestrator.watch_retry_ms.max(1))
    }
}

fn read_user_file(path: &Path) -> anyhow::Result<Option<AppConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let user = toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(user))
}

fn write_creating_parent(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests;
