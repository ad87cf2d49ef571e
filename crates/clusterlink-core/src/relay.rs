use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::state::{ChangeEvent, ConfigState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Alert {
    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { title: title.into(), message: message.into(), severity: Severity::Warning }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { title: title.into(), message: message.into(), severity: Severity::Error }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacePayload {
    pub context_name: String,
    pub namespace_name: String,
}

/// Message understood by the consumer surfaces, serialised as
/// `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ConsumerAction {
    #[serde(rename = "config/setKubeConfig")]
    SetKubeConfig(Arc<ConfigState>),
    #[serde(rename = "config/setClusterProxyPort")]
    SetClusterProxyPort(u16),
    #[serde(rename = "config/setAccessLoading")]
    SetAccessLoading(bool),
    #[serde(rename = "config/addNamespaceToContext")]
    AddNamespaceToContext(NamespacePayload),
    #[serde(rename = "config/removeNamespaceFromContext")]
    RemoveNamespaceFromContext(NamespacePayload),
    #[serde(rename = "alert/show")]
    ShowAlert(Alert),
}

impl From<ChangeEvent> for ConsumerAction {
    fn from(event: ChangeEvent) -> Self {
        match event {
            ChangeEvent::NamespaceAdded { context_name, namespace_name } => {
                Self::AddNamespaceToContext(NamespacePayload { context_name, namespace_name })
            }
            ChangeEvent::NamespaceRemoved { context_name, namespace_name } => {
                Self::RemoveNamespaceFromContext(NamespacePayload { context_name, namespace_name })
            }
            ChangeEvent::KubeconfigChanged { config_state } => Self::SetKubeConfig(config_state),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Every consumer surface.
    Broadcast,
    /// Only the surface the user is currently interacting with.
    Targeted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub delivery: Delivery,
    pub action: ConsumerAction,
}

/// Sending half of the consumer channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventRelay {
    tx: mpsc::UnboundedSender<RelayMessage>,
}

impl EventRelay {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RelayMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ChangeEvent) {
        self.send(Delivery::Broadcast, event.into());
    }

    pub fn emit_config(&self, state: Arc<ConfigState>) {
        self.emit(ChangeEvent::KubeconfigChanged { config_state: state });
    }

    pub fn broadcast(&self, action: ConsumerAction) {
        self.send(Delivery::Broadcast, action);
    }

    pub fn emit_targeted(&self, action: ConsumerAction) {
        self.send(Delivery::Targeted, action);
    }

    pub fn alert(&self, alert: Alert) {
        self.send(Delivery::Broadcast, ConsumerAction::ShowAlert(alert));
    }

    fn send(&self, delivery: Delivery, action: ConsumerAction) {
        if self.tx.send(RelayMessage { delivery, action }).is_err() {
            debug!("Consumer channel closed; dropping relay message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Context;

    #[test]
    fn change_events_are_broadcast() {
        let (relay, mut rx) = EventRelay::channel();
        relay.emit(ChangeEvent::NamespaceAdded { context_name: "a".into(), namespace_name: "default".into() });

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.delivery, Delivery::Broadcast);
        assert_eq!(
            msg.action,
            ConsumerAction::AddNamespaceToContext(NamespacePayload {
                context_name: "a".into(),
                namespace_name: "default".into()
            })
        );
    }

    #[test]
    fn proxy_port_is_targeted() {
        let (relay, mut rx) = EventRelay::channel();
        relay.emit_targeted(ConsumerAction::SetClusterProxyPort(38211));
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.delivery, Delivery::Targeted);
        assert_eq!(msg.action, ConsumerAction::SetClusterProxyPort(38211));
    }

    #[test]
    fn closed_consumer_does_not_panic() {
        let (relay, rx) = EventRelay::channel();
        drop(rx);
        relay.alert(Alert::warning("t", "m"));
    }

    #[test]
    fn actions_use_type_and_payload_keys() {
        let json = serde_json::to_value(ConsumerAction::SetClusterProxyPort(8001)).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "config/setClusterProxyPort", "payload": 8001 }));

        let json = serde_json::to_value(ConsumerAction::RemoveNamespaceFromContext(NamespacePayload {
            context_name: "prod".into(),
            namespace_name: "team-a".into(),
        }))
        .unwrap();
        assert_eq!(json["type"], "config/removeNamespaceFromContext");
        assert_eq!(json["payload"]["contextName"], "prod");
        assert_eq!(json["payload"]["namespaceName"], "team-a");
    }

    #[test]
    fn kubeconfig_payload_carries_the_snapshot() {
        let state = Arc::new(ConfigState::from_contexts("/kc", None, vec![Context::new("a", "c", "u")]));
        let json = serde_json::to_value(ConsumerAction::from(ChangeEvent::KubeconfigChanged {
            config_state: state,
        }))
        .unwrap();
        assert_eq!(json["type"], "config/setKubeConfig");
        assert_eq!(json["payload"]["path"], "/kc");
        assert_eq!(json["payload"]["isPathValid"], true);
    }

    #[test]
    fn alert_severity_is_lowercase() {
        let json = serde_json::to_value(ConsumerAction::ShowAlert(Alert::warning("Heads up", "msg"))).unwrap();
        assert_eq!(json["type"], "alert/show");
        assert_eq!(json["payload"]["severity"], "warning");
    }
}
