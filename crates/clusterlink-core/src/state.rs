//! Snapshot types shared between the orchestrator and its consumers.
//!
//! A [`ConfigState`] is never edited in place once published. Every change
//! builds a new value and it is shared behind an `Arc`, so consumers can
//! detect a change with `Arc::ptr_eq`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of the access probe for one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessSummary {
    pub namespace: String,
    pub allowed: Vec<String>,
    pub denied: Vec<String>,
}

impl AccessSummary {
    pub fn can(&self, verb: &str) -> bool {
        self.allowed.iter().any(|v| v == verb)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub name: String,
    pub cluster_name: String,
    pub user_name: String,
    pub namespace: Option<String>,
    /// Namespaces seen by this context's watch session. `None` means the
    /// access probe failed.
    #[serde(default)]
    pub namespaces: BTreeMap<String, Option<AccessSummary>>,
}

impl Context {
    pub fn new(name: impl Into<String>, cluster_name: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster_name: cluster_name.into(),
            user_name: user_name.into(),
            namespace: None,
            namespaces: BTreeMap::new(),
        }
    }

    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigState {
    path: String,
    is_path_valid: bool,
    current_context: Option<String>,
    contexts: Vec<Context>,
}

impl ConfigState {
    /// Builds a state from parsed contexts. The path is valid only when at
    /// least one context was found.
    pub fn from_contexts(path: impl Into<String>, current_context: Option<String>, contexts: Vec<Context>) -> Self {
        Self { path: path.into(), is_path_valid: !contexts.is_empty(), current_context, contexts }
    }

    pub fn invalid(path: impl Into<String>) -> Self {
        Self { path: path.into(), is_path_valid: false, current_context: None, contexts: Vec::new() }
    }

    /// State published after the kubeconfig file has been deleted.
    pub fn empty() -> Self {
        Self::invalid(String::new())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_path_valid(&self) -> bool {
        self.is_path_valid
    }

    pub fn current_context(&self) -> Option<&str> {
        self.current_context.as_deref()
    }

    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn context_names(&self) -> Vec<&str> {
        self.contexts.iter().map(|c| c.name.as_str()).collect()
    }

    /// Same path, context names and current context; namespaces are ignored.
    pub fn same_shape(&self, other: &ConfigState) -> bool {
        self.path == other.path
            && self.current_context == other.current_context
            && self.context_names() == other.context_names()
    }

    pub fn with_namespace(&self, context: &str, namespace: &str, access: Option<AccessSummary>) -> Self {
        self.map_context(context, |ctx| {
            ctx.namespaces.insert(namespace.to_string(), access);
        })
    }

    pub fn without_namespace(&self, context: &str, namespace: &str) -> Self {
        self.map_context(context, |ctx| {
            ctx.namespaces.remove(namespace);
        })
    }

    pub fn with_cleared_namespaces(&self, context: &str) -> Self {
        self.map_context(context, |ctx| ctx.namespaces.clear())
    }

    /// Copies namespace knowledge for contexts that exist in both states.
    pub fn carry_namespaces_from(mut self, previous: &ConfigState) -> Self {
        for ctx in &mut self.contexts {
            if let Some(old) = previous.context(&ctx.name) {
                if old.cluster_name == ctx.cluster_name && old.user_name == ctx.user_name {
                    ctx.namespaces = old.namespaces.clone();
                }
            }
        }
        self
    }

    fn map_context(&self, context: &str, f: impl FnOnce(&mut Context)) -> Self {
        let mut next = self.clone();
        if let Some(ctx) = next.contexts.iter_mut().find(|c| c.name == context) {
            f(ctx);
        }
        next
    }
}

/// Granular change produced by the orchestrator. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    NamespaceAdded { context_name: String, namespace_name: String },
    NamespaceRemoved { context_name: String, namespace_name: String },
    KubeconfigChanged { config_state: std::sync::Arc<ConfigState> },
}
