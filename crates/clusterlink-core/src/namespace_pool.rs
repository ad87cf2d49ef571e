use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::relay::{Alert, ConsumerAction, EventRelay};
use crate::state::{AccessSummary, ChangeEvent, ConfigState, Context};
use crate::watch::{AccessProbe, NamespaceEvent, NamespaceEventStream, NamespaceWatchConnector};

/// Number of access checks allowed in flight per watch session.
const PROBE_CONCURRENCY: usize = 8;

/// Latest published configuration, shared with every watch task.
pub type SharedConfig = Arc<watch::Sender<Arc<ConfigState>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Watching,
    Aborted,
    Errored,
}

/// Sent by a watch task when its stream ends or fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    pub context_name: String,
    pub generation: u64,
    pub errored: bool,
}

#[derive(Debug)]
pub struct WatchSession {
    context_name: String,
    generation: u64,
    cancel: CancellationToken,
    state: WatchState,
}

impl WatchSession {
    fn end(&mut self, state: WatchState) {
        self.cancel.cancel();
        self.state = state;
        debug!("Watch session {} (gen {}) is now {:?}", self.context_name, self.generation, self.state);
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// One namespace watch per kubeconfig context.
pub struct NamespaceWatchPool {
    connector: Arc<dyn NamespaceWatchConnector>,
    probe: Arc<dyn AccessProbe>,
    relay: EventRelay,
    config: SharedConfig,
    notices: mpsc::UnboundedSender<SessionEnded>,
    sessions: HashMap<String, WatchSession>,
    next_generation: u64,
}

impl NamespaceWatchPool {
    pub fn new(
        connector: Arc<dyn NamespaceWatchConnector>,
        probe: Arc<dyn AccessProbe>,
        relay: EventRelay,
        config: SharedConfig,
        notices: mpsc::UnboundedSender<SessionEnded>,
    ) -> Self {
        Self { connector, probe, relay, config, notices, sessions: HashMap::new(), next_generation: 0 }
    }

    /// Converges the registry onto `contexts`: sessions for missing contexts
    /// are aborted, new contexts get a fresh session.
    pub fn reconcile(&mut self, contexts: &[Context], kubeconfig_path: &Path) -> ReconcileReport {
        let desired: HashSet<&str> = contexts.iter().map(|c| c.name.as_str()).collect();
        let mut report = ReconcileReport::default();

        let stale: Vec<String> = self.sessions.keys().filter(|name| !desired.contains(name.as_str())).cloned().collect();
        for name in stale {
            if let Some(mut session) = self.sessions.remove(&name) {
                session.end(WatchState::Aborted);
                info!("Stopped namespace watch for removed context {name}");
                report.stopped.push(name);
            }
        }

        for context in contexts {
            if self.ensure(&context.name, kubeconfig_path) {
                report.started.push(context.name.clone());
            }
        }

        report
    }

    /// Starts a session for `context_name` unless one is already registered.
    /// Other sessions are left alone.
    pub fn ensure(&mut self, context_name: &str, kubeconfig_path: &Path) -> bool {
        if self.sessions.contains_key(context_name) {
            return false;
        }
        self.next_generation += 1;
        let session = WatchSession {
            context_name: context_name.to_string(),
            generation: self.next_generation,
            cancel: CancellationToken::new(),
            state: WatchState::Watching,
        };
        self.spawn_session(&session, kubeconfig_path);
        info!("Started namespace watch for context {context_name}");
        self.sessions.insert(context_name.to_string(), session);
        true
    }

    /// Drops the entry for a failed watch and clears what it had reported.
    /// Notices from an older generation of the same context are ignored.
    pub fn handle_session_ended(&mut self, notice: &SessionEnded) -> bool {
        let current = self.sessions.get(&notice.context_name).map(|s| s.generation);
        if current != Some(notice.generation) {
            debug!("Ignoring end of stale watch {} gen {}", notice.context_name, notice.generation);
            return false;
        }
        if let Some(mut session) = self.sessions.remove(&notice.context_name) {
            session.end(if notice.errored { WatchState::Errored } else { WatchState::Aborted });
        }
        warn!("Namespace watch for {} ended", notice.context_name);

        let had_namespaces =
            self.config.borrow().context(&notice.context_name).is_some_and(|c| !c.namespaces.is_empty());
        if had_namespaces {
            let snapshot = publish(&self.config, |s| s.with_cleared_namespaces(&notice.context_name));
            self.relay.emit_config(snapshot);
        }
        true
    }

    pub fn abort_all(&mut self) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(self.sessions.len());
        for (name, mut session) in self.sessions.drain() {
            session.end(WatchState::Aborted);
            names.push(name);
        }
        names.sort();
        if !names.is_empty() {
            info!("Aborted {} namespace watch session(s)", names.len());
        }
        names
    }

    pub fn active_contexts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn session_state(&self, context_name: &str) -> Option<WatchState> {
        self.sessions.get(context_name).map(|s| s.state)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn spawn_session(&self, session: &WatchSession, kubeconfig_path: &Path) {
        let task = SessionTask {
            connector: self.connector.clone(),
            probe: self.probe.clone(),
            relay: self.relay.clone(),
            config: self.config.clone(),
            context_name: session.context_name.clone(),
            kubeconfig_path: kubeconfig_path.to_path_buf(),
        };
        let notices = self.notices.clone();
        let cancel = session.cancel.clone();
        let generation = session.generation;

        tokio::spawn(async move {
            let errored = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Watch for {} aborted", task.context_name);
                    return;
                }
                result = task.run() => match result {
                    Ok(()) => {
                        debug!("Watch stream for {} closed", task.context_name);
                        false
                    }
                    Err(e) => {
                        warn!("Watch for {} failed: {e:#}", task.context_name);
                        true
                    }
                },
            };
            let _ = notices.send(SessionEnded { context_name: task.context_name.clone(), generation, errored });
        });
    }
}

impl Drop for NamespaceWatchPool {
    fn drop(&mut self) {
        self.abort_all();
    }
}

type CheckResult = (String, u64, anyhow::Result<AccessSummary>);

struct SessionTask {
    connector: Arc<dyn NamespaceWatchConnector>,
    probe: Arc<dyn AccessProbe>,
    relay: EventRelay,
    config: SharedConfig,
    context_name: String,
    kubeconfig_path: PathBuf,
}

impl SessionTask {
    /// Follows the namespace watch until it fails. The API server closes
    /// watches on its own timeout; those streams are reopened in place.
    async fn run(&self) -> anyhow::Result<()> {
        loop {
            let stream = self.connector.connect(&self.context_name, &self.kubeconfig_path).await?;
            if !self.follow(stream).await? {
                anyhow::bail!("watch for {} closed before delivering any event", self.context_name);
            }
            debug!("Watch stream for {} closed by the server; reconnecting", self.context_name);
        }
    }

    /// Returns whether the stream delivered at least one event.
    async fn follow(&self, mut stream: NamespaceEventStream) -> anyhow::Result<bool> {
        let limit = Arc::new(Semaphore::new(PROBE_CONCURRENCY));
        let mut checks: FuturesUnordered<BoxFuture<'static, CheckResult>> = FuturesUnordered::new();
        // namespace -> ticket of the check whose result still counts
        let mut in_flight: HashMap<String, u64> = HashMap::new();
        let mut next_ticket = 0u64;
        let mut saw_event = false;

        loop {
            tokio::select! {
                Some((namespace, ticket, access)) = checks.next(), if !checks.is_empty() => {
                    if in_flight.get(&namespace) == Some(&ticket) {
                        in_flight.remove(&namespace);
                        self.namespace_added(namespace, access, in_flight.is_empty());
                    }
                }
                event = stream.next() => match event {
                    None => break,
                    Some(Err(e)) => {
                        if !in_flight.is_empty() {
                            self.relay.broadcast(ConsumerAction::SetAccessLoading(false));
                        }
                        return Err(e);
                    }
                    Some(Ok(event)) => {
                        saw_event = true;
                        match event {
                            NamespaceEvent::Added(namespace) => {
                                if in_flight.is_empty() {
                                    self.relay.broadcast(ConsumerAction::SetAccessLoading(true));
                                }
                                next_ticket += 1;
                                in_flight.insert(namespace.clone(), next_ticket);
                                checks.push(self.access_check(namespace, next_ticket, limit.clone()));
                            }
                            NamespaceEvent::Deleted(namespace) => {
                                // a pending check for this namespace is discarded when it lands
                                let cancelled = in_flight.remove(&namespace).is_some();
                                self.namespace_removed(namespace);
                                if cancelled && in_flight.is_empty() {
                                    self.relay.broadcast(ConsumerAction::SetAccessLoading(false));
                                }
                            }
                            NamespaceEvent::Other => {}
                        }
                    }
                },
            }
        }

        while let Some((namespace, ticket, access)) = checks.next().await {
            if in_flight.get(&namespace) == Some(&ticket) {
                in_flight.remove(&namespace);
                self.namespace_added(namespace, access, in_flight.is_empty());
            }
        }
        Ok(saw_event)
    }

    fn access_check(&self, namespace: String, ticket: u64, limit: Arc<Semaphore>) -> BoxFuture<'static, CheckResult> {
        let probe = self.probe.clone();
        let context_name = self.context_name.clone();
        let kubeconfig_path = self.kubeconfig_path.clone();
        async move {
            let access = match limit.acquire_owned().await {
                Ok(_permit) => probe.probe(&context_name, &kubeconfig_path, &namespace).await,
                Err(e) => Err(e.into()),
            };
            (namespace, ticket, access)
        }
        .boxed()
    }

    fn namespace_added(&self, namespace: String, access: anyhow::Result<AccessSummary>, last_check: bool) {
        let (summary, failure) = match access {
            Ok(summary) => (Some(summary), None),
            Err(e) => (None, Some(e)),
        };

        let snapshot = publish(&self.config, |s| s.with_namespace(&self.context_name, &namespace, summary));
        self.relay.emit_config(snapshot);
        self.relay.emit(ChangeEvent::NamespaceAdded {
            context_name: self.context_name.clone(),
            namespace_name: namespace.clone(),
        });
        if last_check {
            self.relay.broadcast(ConsumerAction::SetAccessLoading(false));
        }

        if let Some(e) = failure {
            warn!("Access probe for {}/{namespace} failed: {e:#}", self.context_name);
            self.relay.alert(Alert::warning(
                format!("Could not load access for namespace {namespace}"),
                format!(
                    "Checking access in context {} failed ({e}); this may be due to a lack of permissions",
                    self.context_name
                ),
            ));
        }
    }

    fn namespace_removed(&self, namespace: String) {
        publish(&self.config, |s| s.without_namespace(&self.context_name, &namespace));
        self.relay.emit(ChangeEvent::NamespaceRemoved { context_name: self.context_name.clone(), namespace_name: namespace });
    }
}

/// Replaces the shared snapshot with `f(current)` and returns the new one.
pub(crate) fn publish(config: &SharedConfig, f: impl FnOnce(&ConfigState) -> ConfigState) -> Arc<ConfigState> {
    let mut next = None;
    config.send_modify(|current| {
        let updated = Arc::new(f(current));
        next = Some(updated.clone());
        *current = updated;
    });
    next.unwrap_or_else(|| config.borrow().clone())
}
