//! Seams between the watch pool and the cluster.
//!
//! The pool only talks to [`NamespaceWatchConnector`] and [`AccessProbe`];
//! the kube-backed implementations live here as well.

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::authorization::v1::{ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{PostParams, WatchEvent, WatchParams};
use kube::Api;
use tracing::debug;

use crate::client::KubeClient;
use crate::state::AccessSummary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceEvent {
    Added(String),
    Deleted(String),
    /// Modifications and bookmarks; carries nothing the pool acts on.
    Other,
}

pub type NamespaceEventStream = BoxStream<'static, anyhow::Result<NamespaceEvent>>;

#[async_trait]
pub trait NamespaceWatchConnector: Send + Sync + 'static {
    /// Opens a watch on the namespace collection for one context.
    async fn connect(&self, context_name: &str, kubeconfig_path: &Path) -> anyhow::Result<NamespaceEventStream>;
}

#[async_trait]
pub trait AccessProbe: Send + Sync + 'static {
    async fn probe(&self, context_name: &str, kubeconfig_path: &Path, namespace: &str) -> anyhow::Result<AccessSummary>;
}

/// Watches `/api/v1/namespaces` with bookmarks enabled.
#[derive(Debug, Clone, Default)]
pub struct KubeWatchConnector;

#[async_trait]
impl NamespaceWatchConnector for KubeWatchConnector {
    async fn connect(&self, context_name: &str, kubeconfig_path: &Path) -> anyhow::Result<NamespaceEventStream> {
        let client = KubeClient::from_config(kubeconfig_path, context_name).await?;
        let api: Api<Namespace> = Api::all(client.inner_client());
        let params = WatchParams { bookmarks: true, ..WatchParams::default() };

        let stream = api.watch(&params, "0").await?;
        debug!("Opened namespace watch for context {}", client.context());

        Ok(stream
            .map_err(anyhow::Error::from)
            .and_then(|event| async move {
                match event {
                    WatchEvent::Added(ns) => Ok(NamespaceEvent::Added(ns.metadata.name.unwrap_or_default())),
                    WatchEvent::Deleted(ns) => Ok(NamespaceEvent::Deleted(ns.metadata.name.unwrap_or_default())),
                    WatchEvent::Modified(_) | WatchEvent::Bookmark(_) => Ok(NamespaceEvent::Other),
                    WatchEvent::Error(err) => Err(anyhow::anyhow!("watch error: {err:?}")),
                }
            })
            .boxed())
    }
}

pub const PROBED_VERBS: [&str; 6] = ["get", "list", "watch", "create", "update", "delete"];

/// Answers `can-i <verb> * -n <namespace>` with `SelfSubjectAccessReview`s.
#[derive(Debug, Clone, Default)]
pub struct KubeAccessProbe;

#[async_trait]
impl AccessProbe for KubeAccessProbe {
    async fn probe(&self, context_name: &str, kubeconfig_path: &Path, namespace: &str) -> anyhow::Result<AccessSummary> {
        let client = KubeClient::from_config(kubeconfig_path, context_name).await?;
        let api: Api<SelfSubjectAccessReview> = Api::all(client.inner_client());

        let mut allowed = Vec::new();
        let mut denied = Vec::new();
        for verb in PROBED_VERBS {
            let review = SelfSubjectAccessReview {
                spec: SelfSubjectAccessReviewSpec {
                    resource_attributes: Some(ResourceAttributes {
                        namespace: Some(namespace.to_string()),
                        verb: Some(verb.to_string()),
                        group: Some("*".into()),
                        resource: Some("*".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            };
            let response = api.create(&PostParams::default(), &review).await?;
            if response.status.map(|s| s.allowed).unwrap_or(false) {
                allowed.push(verb.to_string());
            } else {
                denied.push(verb.to_string());
            }
        }

        Ok(AccessSummary { namespace: namespace.to_string(), allowed, denied })
    }
}
