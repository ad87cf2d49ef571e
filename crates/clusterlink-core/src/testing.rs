//! In-memory collaborators used by unit tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as futures_mpsc;
use futures::StreamExt;

use crate::state::AccessSummary;
use crate::watch::{AccessProbe, NamespaceEvent, NamespaceEventStream, NamespaceWatchConnector};

type EventSender = futures_mpsc::UnboundedSender<anyhow::Result<NamespaceEvent>>;

/// Hands out channel-backed watch streams and records every connect.
#[derive(Default)]
pub struct FakeConnector {
    senders: Mutex<HashMap<String, EventSender>>,
    connects: Mutex<Vec<String>>,
    refuse: Mutex<HashSet<String>>,
}

impl FakeConnector {
    pub fn refuse(&self, context: &str) {
        self.refuse.lock().unwrap().insert(context.to_string());
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn connect_count(&self, context: &str) -> usize {
        self.connects.lock().unwrap().iter().filter(|c| c.as_str() == context).count()
    }

    pub fn send(&self, context: &str, event: anyhow::Result<NamespaceEvent>) -> bool {
        let senders = self.senders.lock().unwrap();
        senders.get(context).is_some_and(|tx| tx.unbounded_send(event).is_ok())
    }

    pub fn close(&self, context: &str) {
        self.senders.lock().unwrap().remove(context);
    }

    /// True once the pool has dropped the stream for `context`.
    pub fn is_closed(&self, context: &str) -> bool {
        self.senders.lock().unwrap().get(context).map_or(true, |tx| tx.is_closed())
    }
}

#[async_trait]
impl NamespaceWatchConnector for FakeConnector {
    async fn connect(&self, context_name: &str, _kubeconfig_path: &Path) -> anyhow::Result<NamespaceEventStream> {
        self.connects.lock().unwrap().push(context_name.to_string());
        if self.refuse.lock().unwrap().contains(context_name) {
            anyhow::bail!("connection refused for {context_name}");
        }
        let (tx, rx) = futures_mpsc::unbounded();
        self.senders.lock().unwrap().insert(context_name.to_string(), tx);
        Ok(rx.boxed())
    }
}

/// Grants `get` and `list` everywhere except for namespaces marked as failing.
#[derive(Default)]
pub struct FakeProbe {
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl FakeProbe {
    pub fn fail_for(&self, namespace: &str) {
        self.failing.lock().unwrap().insert(namespace.to_string());
    }

    pub fn delay_for(&self, namespace: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(namespace.to_string(), delay);
    }
}

#[async_trait]
impl AccessProbe for FakeProbe {
    async fn probe(&self, _context_name: &str, _kubeconfig_path: &Path, namespace: &str) -> anyhow::Result<AccessSummary> {
        let delay = self.delays.lock().unwrap().get(namespace).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(namespace) {
            anyhow::bail!("forbidden");
        }
        Ok(AccessSummary {
            namespace: namespace.to_string(),
            allowed: vec!["get".into(), "list".into()],
            denied: vec!["delete".into()],
        })
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
