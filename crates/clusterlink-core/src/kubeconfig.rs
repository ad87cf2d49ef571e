use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use kube::config::Kubeconfig;
use tracing::{debug, warn};

use crate::relay::Alert;
use crate::state::{ConfigState, Context};

pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Everything the resolver looks at, in priority order.
#[derive(Debug, Clone, Default)]
pub struct ResolverInputs {
    pub explicit_path: Option<PathBuf>,
    pub env_value: Option<OsString>,
    pub stored_setting: Option<String>,
    pub home_dir: Option<PathBuf>,
}

impl ResolverInputs {
    /// Reads `KUBECONFIG` and the home directory from the current process.
    pub fn from_environment(explicit_path: Option<PathBuf>, stored_setting: Option<String>) -> Self {
        Self { explicit_path, env_value: std::env::var_os(KUBECONFIG_ENV), stored_setting, home_dir: dirs::home_dir() }
    }

    /// Picks the kubeconfig path. The alert is set when `KUBECONFIG` listed
    /// more than one file.
    pub fn select_path(&self) -> (PathBuf, Option<Alert>) {
        if let Some(path) = &self.explicit_path {
            return (path.clone(), None);
        }

        if let Some(value) = &self.env_value {
            let paths: Vec<PathBuf> = std::env::split_paths(value).filter(|p| !p.as_os_str().is_empty()).collect();
            if let Some(first) = paths.first() {
                let warning = (paths.len() > 1).then(|| {
                    Alert::warning(
                        "Found multiple configs, selected the first",
                        format!("{KUBECONFIG_ENV} lists {} files; using {}", paths.len(), first.display()),
                    )
                });
                return (first.clone(), warning);
            }
        }

        if let Some(stored) = self.stored_setting.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return (PathBuf::from(stored), None);
        }

        let home = self.home_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        (home.join(".kube").join("config"), None)
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub state: Arc<ConfigState>,
    pub warning: Option<Alert>,
}

/// Resolves and parses the active kubeconfig. Never fails: an unreadable or
/// malformed file produces an invalid state.
pub fn resolve(inputs: &ResolverInputs) -> Resolution {
    let (path, warning) = inputs.select_path();
    debug!("Resolved kubeconfig path {}", path.display());

    let state = match parse_kubeconfig(&path) {
        Ok(state) => state,
        Err(e) => {
            warn!("Kubeconfig at {} is unusable: {e:#}", path.display());
            ConfigState::invalid(path.to_string_lossy())
        }
    };

    Resolution { state: Arc::new(state), warning }
}

pub fn parse_kubeconfig(path: &Path) -> anyhow::Result<ConfigState> {
    let raw = Kubeconfig::read_from(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(to_state(&path.to_string_lossy(), raw))
}

pub fn parse_kubeconfig_str(path: &str, contents: &str) -> anyhow::Result<ConfigState> {
    let raw = Kubeconfig::from_yaml(contents).context("parsing kubeconfig YAML")?;
    Ok(to_state(path, raw))
}

fn to_state(path: &str, raw: Kubeconfig) -> ConfigState {
    let contexts = raw
        .contexts
        .into_iter()
        .map(|named| {
            let body = named.context.unwrap_or_default();
            Context {
                name: named.name,
                cluster_name: body.cluster,
                user_name: body.user.unwrap_or_default(),
                namespace: body.namespace.filter(|ns| !ns.is_empty()),
                namespaces: Default::default(),
            }
        })
        .collect();

    let current_context = raw.current_context.filter(|c| !c.is_empty());
    ConfigState::from_contexts(path, current_context, contexts)
}
