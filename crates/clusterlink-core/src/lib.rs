pub mod client;
pub mod error;
pub mod file_watcher;
pub mod kubeconfig;
pub mod namespace_pool;
pub mod orchestrator;
pub mod process_tree;
pub mod proxy;
pub mod relay;
pub mod state;
pub mod watch;

#[cfg(test)]
mod testing;

pub use client::KubeClient;
pub use error::ProxyError;
pub use file_watcher::{ConfigFileWatcher, FileChange};
pub use kubeconfig::{parse_kubeconfig, resolve, Resolution, ResolverInputs};
pub use namespace_pool::{NamespaceWatchPool, ReconcileReport, SessionEnded, WatchState};
pub use orchestrator::{Orchestrator, OrchestratorCommand, OrchestratorHandle, OrchestratorSettings};
pub use proxy::{ProxyCommand, ProxyProcessManager, ProxyState};
pub use relay::{Alert, ConsumerAction, Delivery, EventRelay, RelayMessage, Severity};
pub use state::{AccessSummary, ChangeEvent, ConfigState, Context};
pub use watch::{AccessProbe, KubeAccessProbe, KubeWatchConnector, NamespaceEvent, NamespaceWatchConnector};
