//! The reconciliation loop.
//!
//! A single actor task owns the file watcher, the proxy and the watch pool.
//! Everything else talks to it through [`OrchestratorHandle`], so no state is
//! shared except the published [`ConfigState`] snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clusterlink_config::AppConfig;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::file_watcher::{ConfigFileWatcher, FileChange};
use crate::kubeconfig::{self, ResolverInputs};
use crate::namespace_pool::{publish, NamespaceWatchPool, SessionEnded, SharedConfig};
use crate::proxy::{ProxyCommand, ProxyProcessManager, ProxyState};
use crate::relay::{Alert, ConsumerAction, EventRelay};
use crate::state::ConfigState;
use crate::watch::{AccessProbe, NamespaceWatchConnector};

/// Upper bound for the delay before a failed watch is reopened.
const WATCH_RETRY_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub file_poll_interval: Duration,
    pub reconcile_interval: Duration,
    /// First retry delay for a failed watch; doubled on each further failure.
    pub watch_retry_base: Duration,
    pub proxy: ProxyCommand,
    pub stored_kubeconfig: Option<String>,
    pub explicit_kubeconfig: Option<PathBuf>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            file_poll_interval: Duration::from_secs(1),
            reconcile_interval: Duration::from_secs(60 * 60),
            watch_retry_base: Duration::from_secs(1),
            proxy: ProxyCommand::default(),
            stored_kubeconfig: None,
            explicit_kubeconfig: None,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig, explicit_kubeconfig: Option<PathBuf>) -> Self {
        Self {
            file_poll_interval: config.file_poll_interval(),
            reconcile_interval: config.reconcile_interval(),
            watch_retry_base: config.watch_retry_base(),
            proxy: ProxyCommand::from(&config.proxy),
            stored_kubeconfig: config.general.stored_kubeconfig().map(str::to_string),
            explicit_kubeconfig,
        }
    }
}

#[derive(Debug)]
pub enum OrchestratorCommand {
    /// Replaces the kubeconfig path chosen at startup; `None` falls back to
    /// the environment and stored setting.
    SetKubeconfigOverride(Option<PathBuf>),
    /// Re-resolves the kubeconfig and reconciles immediately.
    Refresh,
    ActiveSessions(oneshot::Sender<Vec<String>>),
    Shutdown,
}

pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<OrchestratorCommand>,
    state: watch::Receiver<Arc<ConfigState>>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    pub fn send(&self, command: OrchestratorCommand) -> anyhow::Result<()> {
        self.commands.send(command).map_err(|_| anyhow::anyhow!("orchestrator is not running"))
    }

    /// Context names that currently have a namespace watch.
    pub async fn active_sessions(&self) -> anyhow::Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.send(OrchestratorCommand::ActiveSessions(tx))?;
        Ok(rx.await?)
    }

    pub fn config_state(&self) -> Arc<ConfigState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigState>> {
        self.state.clone()
    }

    /// Stops the watcher, the proxy and every watch session, then waits for
    /// the actor to exit.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.commands.send(OrchestratorCommand::Shutdown);
        self.task.await?;
        Ok(())
    }
}

pub struct Orchestrator;

impl Orchestrator {
    /// Starts the actor on its own task and resolves the kubeconfig right away.
    pub fn spawn(
        settings: OrchestratorSettings,
        connector: Arc<dyn NamespaceWatchConnector>,
        probe: Arc<dyn AccessProbe>,
        relay: EventRelay,
    ) -> OrchestratorHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(Arc::new(ConfigState::empty()));
        let config: SharedConfig = Arc::new(state_tx);
        let (notices_tx, notices) = mpsc::unbounded_channel();
        let (file_tx, file_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        let (retry_tx, retries) = mpsc::unbounded_channel();

        let actor = Actor {
            pool: NamespaceWatchPool::new(connector, probe, relay.clone(), config.clone(), notices_tx),
            proxy: ProxyProcessManager::new(settings.proxy.clone()),
            watcher: ConfigFileWatcher::new(settings.file_poll_interval),
            override_path: None,
            active_path: None,
            file_missing: false,
            interval: None,
            failures: HashMap::new(),
            settings,
            relay,
            config,
            commands,
            notices,
            file_tx,
            file_rx,
            outcome_tx,
            outcomes,
            retry_tx,
            retries,
        };

        let task = tokio::spawn(actor.run());
        OrchestratorHandle { commands: commands_tx, state: state_rx, task }
    }
}

type ProxyOutcome = (u64, Result<u16, ProxyError>);

struct Actor {
    settings: OrchestratorSettings,
    relay: EventRelay,
    config: SharedConfig,
    pool: NamespaceWatchPool,
    proxy: ProxyProcessManager,
    watcher: ConfigFileWatcher,
    override_path: Option<Option<PathBuf>>,
    active_path: Option<PathBuf>,
    /// Set between a `Deleted` notification and the file's return.
    file_missing: bool,
    interval: Option<Interval>,
    /// Consecutive watch failures per context, for retry backoff.
    failures: HashMap<String, u32>,
    commands: mpsc::UnboundedReceiver<OrchestratorCommand>,
    notices: mpsc::UnboundedReceiver<SessionEnded>,
    file_tx: mpsc::UnboundedSender<FileChange>,
    file_rx: mpsc::UnboundedReceiver<FileChange>,
    outcome_tx: mpsc::UnboundedSender<ProxyOutcome>,
    outcomes: mpsc::UnboundedReceiver<ProxyOutcome>,
    retry_tx: mpsc::UnboundedSender<String>,
    retries: mpsc::UnboundedReceiver<String>,
}

impl Actor {
    async fn run(mut self) {
        info!("Orchestrator starting");
        self.start();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(OrchestratorCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(change) = self.file_rx.recv() => self.on_file_change(change),
                _ = next_tick(&mut self.interval) => self.on_tick(),
                Some(notice) = self.notices.recv() => self.on_session_ended(notice),
                Some(context_name) = self.retries.recv() => self.on_retry(context_name),
                Some((generation, outcome)) = self.outcomes.recv() => self.on_proxy_outcome(generation, outcome),
            }
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: OrchestratorCommand) {
        match command {
            OrchestratorCommand::SetKubeconfigOverride(path) => {
                info!("Kubeconfig override set to {path:?}");
                self.override_path = Some(path);
                self.start();
            }
            OrchestratorCommand::Refresh => self.start(),
            OrchestratorCommand::ActiveSessions(reply) => {
                let _ = reply.send(self.pool.active_contexts());
            }
            OrchestratorCommand::Shutdown => {}
        }
    }

    fn explicit_path(&self) -> Option<PathBuf> {
        match &self.override_path {
            Some(path) => path.clone(),
            None => self.settings.explicit_kubeconfig.clone(),
        }
    }

    /// Resolves the kubeconfig and brings every component in line with it.
    fn start(&mut self) {
        let inputs = ResolverInputs::from_environment(self.explicit_path(), self.settings.stored_kubeconfig.clone());
        let resolution = kubeconfig::resolve(&inputs);
        if let Some(alert) = resolution.warning {
            self.relay.alert(alert);
        }

        let path = PathBuf::from(resolution.state.path());
        let path_changed = self.active_path.as_deref() != Some(path.as_path());

        let state = if path_changed {
            // sessions were opened with the old file's credentials
            self.pool.abort_all();
            self.config.send_replace(resolution.state.clone());
            resolution.state
        } else {
            let resolved = Arc::unwrap_or_clone(resolution.state);
            publish(&self.config, |current| resolved.carry_namespaces_from(current))
        };
        self.relay.emit_config(state.clone());
        self.file_missing = false;
        self.failures.clear();

        if path_changed || !self.watcher.is_watching() {
            if let Err(e) = self.watcher.watch(&path, self.file_tx.clone()) {
                warn!("Could not watch {}: {e:#}", path.display());
            }
        }
        self.active_path = Some(path.clone());

        if !state.is_path_valid() {
            self.proxy.stop();
        } else if path_changed || !matches!(self.proxy.state(), ProxyState::Starting | ProxyState::Running) {
            self.restart_proxy(&path);
        }

        let report = self.pool.reconcile(state.contexts(), &path);
        debug!("Reconciled watches: started {:?}, stopped {:?}", report.started, report.stopped);

        self.restart_interval();
    }

    fn on_file_change(&mut self, change: FileChange) {
        match change {
            FileChange::Modified => {
                info!("Kubeconfig changed on disk");
                self.start();
            }
            FileChange::Deleted => {
                info!("Kubeconfig deleted; clearing state");
                self.file_missing = true;
                self.replace_state(Arc::new(ConfigState::empty()));
                self.proxy.stop();
                let path = self.active_path.clone().unwrap_or_default();
                self.pool.reconcile(&[], &path);
            }
        }
    }

    /// Periodic safety net: re-reads the file even if no change was seen.
    fn on_tick(&mut self) {
        let Some(path) = self.active_path.clone() else {
            return;
        };
        debug!("Reconcile tick for {}", path.display());

        if self.file_missing {
            if path.exists() {
                info!("Kubeconfig {} is back", path.display());
                self.start();
            }
            return;
        }

        match kubeconfig::parse_kubeconfig(&path) {
            Ok(fresh) => {
                let mut changed = None;
                self.config.send_if_modified(|current| {
                    let next = fresh.carry_namespaces_from(current);
                    if next.same_shape(current) && next.is_path_valid() == current.is_path_valid() {
                        return false;
                    }
                    let next = Arc::new(next);
                    changed = Some(next.clone());
                    *current = next;
                    true
                });
                if let Some(state) = &changed {
                    self.relay.emit_config(state.clone());
                }
                let contexts = self.config.borrow().contexts().to_vec();
                let report = self.pool.reconcile(&contexts, &path);
                if !report.is_noop() {
                    info!("Reconcile tick started {:?}, stopped {:?}", report.started, report.stopped);
                }
            }
            Err(e) => {
                warn!("Reconcile tick could not read {}: {e:#}", path.display());
                self.pool.abort_all();
                self.replace_state(Arc::new(ConfigState::invalid(path.to_string_lossy())));
            }
        }
    }

    fn on_session_ended(&mut self, notice: SessionEnded) {
        if !self.pool.handle_session_ended(&notice) {
            return;
        }
        let attempt = self.failures.entry(notice.context_name.clone()).or_insert(0);
        *attempt += 1;
        let delay = retry_delay(self.settings.watch_retry_base, *attempt);
        info!("Reopening watch for {} in {delay:?} (attempt {attempt})", notice.context_name);

        let tx = self.retry_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(notice.context_name);
        });
    }

    /// Reopens one failed watch if its context is still configured.
    fn on_retry(&mut self, context_name: String) {
        let Some(path) = self.active_path.clone() else {
            return;
        };
        let configured = self.config.borrow().context(&context_name).is_some();
        if configured && self.pool.ensure(&context_name, &path) {
            debug!("Retried watch for {context_name}");
        }
    }

    fn on_proxy_outcome(&mut self, generation: u64, outcome: Result<u16, ProxyError>) {
        if !self.proxy.complete(generation, &outcome) {
            return;
        }
        match outcome {
            Ok(port) => self.relay.emit_targeted(ConsumerAction::SetClusterProxyPort(port)),
            Err(e) => self.proxy_failed(&e),
        }
    }

    fn restart_proxy(&mut self, path: &Path) {
        match self.proxy.spawn(path) {
            Ok(pending) => {
                let tx = self.outcome_tx.clone();
                tokio::spawn(async move {
                    let generation = pending.generation;
                    let outcome = pending.wait().await;
                    let _ = tx.send((generation, outcome));
                });
            }
            Err(e) => self.proxy_failed(&e),
        }
    }

    fn proxy_failed(&self, error: &ProxyError) {
        warn!("Cluster proxy did not start: {error}");
        self.relay.alert(Alert::error("Could not start the cluster proxy", error.to_string()));
    }

    /// The previous timer is dropped before the replacement is created.
    fn restart_interval(&mut self) {
        self.interval.take();
        let period = self.settings.reconcile_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    fn replace_state(&self, state: Arc<ConfigState>) {
        self.config.send_replace(state.clone());
        self.relay.emit_config(state);
    }

    fn teardown(&mut self) {
        self.interval.take();
        self.watcher.stop();
        self.proxy.stop();
        self.pool.abort_all();
        info!("Orchestrator stopped");
    }
}

fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
    base.saturating_mul(factor).min(WATCH_RETRY_MAX)
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
