//! In-memory resource store and the [`Client`] reading from it.
//!
//! The store is fed from manifests (see [`super::manifests`]) and notifies
//! its subscribers of every change, status writes included.

use super::client::{Client, ClientError, NamespaceScope};
use super::resources::{
    Event, Ingress, IngressStatus, Kind, ObjectKey, Resource, ResourceRef, Secret, Service,
};
use super::selector::LabelSelector;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct State {
    ingresses: BTreeMap<ObjectKey, Ingress>,
    services: BTreeMap<ObjectKey, Service>,
    secrets: BTreeMap<ObjectKey, Secret>,
}

impl State {
    fn keys(&self) -> Vec<ResourceRef> {
        let refs = |kind: Kind, key: &ObjectKey| ResourceRef {
            kind,
            key: key.clone(),
        };
        let ingresses = self.ingresses.keys().map(|key| refs(Kind::Ingress, key));
        let services = self.services.keys().map(|key| refs(Kind::Service, key));
        let secrets = self.secrets.keys().map(|key| refs(Kind::Secret, key));
        ingresses.chain(services).chain(secrets).collect()
    }

    fn remove(&mut self, resource: &ResourceRef) {
        match resource.kind {
            Kind::Ingress => {
                self.ingresses.remove(&resource.key);
            }
            Kind::Service => {
                self.services.remove(&resource.key);
            }
            Kind::Secret => {
                self.secrets.remove(&resource.key);
            }
        }
    }
}

struct Subscriber {
    scope: NamespaceScope,
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
pub struct Store {
    // Lock order: `state` before `subscribers`.
    state: RwLock<State>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces an object. Returns the emitted event, if anything changed.
    ///
    /// An ingress keeps its stored status, and its generation is bumped when
    /// the spec changes.
    pub fn apply(&self, resource: Resource) -> Option<Event> {
        let mut state = self.state.write();
        let event = apply_locked(&mut state, resource)?;
        self.notify(&event);
        Some(event)
    }

    /// Makes `resources` the whole content of the store. Only objects that
    /// were added, changed or removed produce events. Returns how many.
    pub fn replace_all(&self, resources: Vec<Resource>) -> usize {
        let mut state = self.state.write();
        let mut wanted = BTreeSet::new();
        let mut events = Vec::new();

        for resource in resources {
            wanted.insert((resource.kind(), resource.key()));
            events.extend(apply_locked(&mut state, resource));
        }

        let stale: Vec<ResourceRef> = state
            .keys()
            .into_iter()
            .filter(|r| !wanted.contains(&(r.kind, r.key.clone())))
            .collect();
        for resource in stale {
            state.remove(&resource);
            events.push(Event::Deleted(resource));
        }

        for event in &events {
            self.notify(event);
        }
        events.len()
    }

    pub fn update_ingress_status(
        &self,
        key: &ObjectKey,
        status: IngressStatus,
    ) -> Result<(), ClientError> {
        let mut state = self.state.write();
        let ingress = state
            .ingresses
            .get_mut(key)
            .ok_or_else(|| ClientError::NotFound {
                kind: Kind::Ingress,
                key: key.clone(),
            })?;
        if ingress.status == status {
            return Ok(());
        }
        ingress.status = status;
        self.notify(&Event::Updated(ResourceRef {
            kind: Kind::Ingress,
            key: key.clone(),
        }));
        Ok(())
    }

    pub fn ingresses(&self) -> Vec<Ingress> {
        self.state.read().ingresses.values().cloned().collect()
    }

    pub fn ingress(&self, key: &ObjectKey) -> Option<Ingress> {
        self.state.read().ingresses.get(key).cloned()
    }

    pub fn service(&self, key: &ObjectKey) -> Option<Service> {
        self.state.read().services.get(key).cloned()
    }

    pub fn secret(&self, key: &ObjectKey) -> Option<Secret> {
        self.state.read().secrets.get(key).cloned()
    }

    /// Receives an `Added` event for every existing object in `scope`, then
    /// every later change in `scope`.
    pub fn subscribe(&self, scope: NamespaceScope) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = self.state.read();
        for resource in state
            .keys()
            .into_iter()
            .filter(|r| scope.contains(&r.key.namespace))
        {
            let _ = tx.send(Event::Added(resource));
        }
        self.subscribers.lock().push(Subscriber { scope, tx });
        rx
    }

    fn notify(&self, event: &Event) {
        let namespace = &event.resource().key.namespace;
        self.subscribers.lock().retain(|subscriber| {
            if !subscriber.scope.contains(namespace) {
                return !subscriber.tx.is_closed();
            }
            subscriber.tx.send(event.clone()).is_ok()
        });
    }
}

fn apply_locked(state: &mut State, resource: Resource) -> Option<Event> {
    let kind = resource.kind();
    let key = resource.key();
    let existed = match resource {
        Resource::Ingress(mut ingress) => match state.ingresses.get(&key) {
            Some(current) => {
                ingress.status = current.status.clone();
                ingress.metadata.generation = if current.spec == ingress.spec {
                    current.metadata.generation
                } else {
                    current.metadata.generation + 1
                };
                if *current == ingress {
                    return None;
                }
                state.ingresses.insert(key.clone(), ingress);
                true
            }
            None => {
                ingress.metadata.generation = ingress.metadata.generation.max(1);
                state.ingresses.insert(key.clone(), ingress);
                false
            }
        },
        Resource::Service(service) => {
            if state.services.get(&key) == Some(&service) {
                return None;
            }
            state.services.insert(key.clone(), service).is_some()
        }
        Resource::Secret(secret) => {
            if state.secrets.get(&key) == Some(&secret) {
                return None;
            }
            state.secrets.insert(key.clone(), secret).is_some()
        }
    };

    let resource = ResourceRef { kind, key };
    Some(if existed {
        Event::Updated(resource)
    } else {
        Event::Added(resource)
    })
}

/// A [`Client`] over a shared [`Store`], restricted to a namespace scope and
/// a label selector for ingresses.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<Store>,
    scope: NamespaceScope,
    selector: LabelSelector,
}

impl StoreClient {
    pub fn new(store: Arc<Store>, scope: NamespaceScope, selector: LabelSelector) -> Self {
        Self {
            store,
            scope,
            selector,
        }
    }

    fn check_scope(&self, namespace: &str) -> Result<(), ClientError> {
        if self.scope.contains(namespace) {
            Ok(())
        } else {
            Err(ClientError::NamespaceNotWatched(namespace.to_string()))
        }
    }
}

#[async_trait]
impl Client for StoreClient {
    async fn watch_all(&self) -> Result<mpsc::UnboundedReceiver<Event>, ClientError> {
        Ok(self.store.subscribe(self.scope.clone()))
    }

    fn list_ingresses(&self) -> Vec<Ingress> {
        self.store
            .ingresses()
            .into_iter()
            .filter(|ingress| self.scope.contains(&ingress.metadata.namespace))
            .filter(|ingress| self.selector.matches(&ingress.metadata.labels))
            .collect()
    }

    fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClientError> {
        self.check_scope(namespace)?;
        let key = ObjectKey::new(namespace, name);
        self.store.service(&key).ok_or(ClientError::NotFound {
            kind: Kind::Service,
            key,
        })
    }

    fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError> {
        self.check_scope(namespace)?;
        let key = ObjectKey::new(namespace, name);
        self.store.secret(&key).ok_or(ClientError::NotFound {
            kind: Kind::Secret,
            key,
        })
    }

    async fn update_ingress_status(&self, ingress: &Ingress) -> Result<(), ClientError> {
        self.check_scope(&ingress.metadata.namespace)?;
        self.store
            .update_ingress_status(&ingress.key(), ingress.status.clone())
    }
}
