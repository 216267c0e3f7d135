use super::resources::{Event, Ingress, Kind, ObjectKey, Secret, Service};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("{kind} {key} not found")]
    NotFound { kind: Kind, key: ObjectKey },
    #[error("namespace {0} is not watched")]
    NamespaceNotWatched(String),
}

/// Namespaces a client sees. Decided once, when the client is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceScope {
    AllNamespaces,
    Scoped(Vec<String>),
}

impl NamespaceScope {
    /// An empty list means every namespace.
    pub fn from_namespaces(namespaces: Vec<String>) -> Self {
        if namespaces.is_empty() {
            NamespaceScope::AllNamespaces
        } else {
            NamespaceScope::Scoped(namespaces)
        }
    }

    pub fn contains(&self, namespace: &str) -> bool {
        match self {
            NamespaceScope::AllNamespaces => true,
            NamespaceScope::Scoped(namespaces) => namespaces.iter().any(|ns| ns == namespace),
        }
    }
}

/// Access to the resource system the Knative provider reads from.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Streams a change notification for every watched object: one per
    /// existing object first, then one per change. Dropping the receiver
    /// ends the watch.
    async fn watch_all(&self) -> Result<mpsc::UnboundedReceiver<Event>, ClientError>;

    /// Ingresses in scope that match the label selector.
    fn list_ingresses(&self) -> Vec<Ingress>;

    fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClientError>;

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError>;

    /// Writes `ingress.status`; every other field is ignored.
    async fn update_ingress_status(&self, ingress: &Ingress) -> Result<(), ClientError>;
}
