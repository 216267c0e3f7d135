//! Combines the latest snapshot of every provider into the live configuration.
//!
//! Keys are qualified with the provider that produced them (`key@provider`),
//! so providers can never overwrite each other. References that already
//! carry a provider (`other@file`) are left untouched, which lets one
//! provider route to services defined by another.

use crate::metrics_defs::{CONFIGURATION_UPDATES, LIVE_ROUTERS, LIVE_SERVICES};
use dynamic::{Configuration, HttpConfiguration, TlsConfiguration};
use provider::Message;
use shared::{counter, gauge};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

fn qualify(name: &str, provider: &str) -> String {
    if name.contains('@') {
        name.to_string()
    } else {
        format!("{name}@{provider}")
    }
}

fn qualify_http(http: &HttpConfiguration, provider: &str) -> HttpConfiguration {
    let mut qualified = HttpConfiguration::new();

    for (key, router) in &http.routers {
        let mut router = router.clone();
        router.service = qualify(&router.service, provider);
        for middleware in &mut router.middlewares {
            *middleware = qualify(middleware, provider);
        }
        qualified.routers.insert(qualify(key, provider), router);
    }
    for (key, middleware) in &http.middlewares {
        qualified
            .middlewares
            .insert(qualify(key, provider), middleware.clone());
    }
    for (key, service) in &http.services {
        let mut service = service.clone();
        for reference in service.references_mut() {
            *reference = qualify(reference, provider);
        }
        qualified.services.insert(qualify(key, provider), service);
    }
    qualified
}

/// Merges per provider snapshots, in provider name order.
pub fn merge_configurations(latest: &BTreeMap<String, Configuration>) -> Configuration {
    let mut merged = Configuration::new();
    let mut certificates = Vec::new();

    for (provider, configuration) in latest {
        merged.http.extend(qualify_http(&configuration.http, provider));
        if let Some(tls) = &configuration.tls {
            certificates.extend(tls.certificates.iter().cloned());
        }
    }

    if !certificates.is_empty() {
        merged.tls = Some(TlsConfiguration { certificates });
    }
    merged
}

pub struct Aggregator {
    latest: BTreeMap<String, Configuration>,
    live: watch::Sender<Arc<Configuration>>,
}

impl Aggregator {
    pub fn new() -> (Self, watch::Receiver<Arc<Configuration>>) {
        let (live, rx) = watch::channel(Arc::new(Configuration::new()));
        let aggregator = Self {
            latest: BTreeMap::new(),
            live,
        };
        (aggregator, rx)
    }

    /// Records the snapshot of one provider. Returns true when the live
    /// configuration changed.
    pub fn apply(&mut self, message: Message) -> bool {
        let Message {
            provider_name,
            configuration,
        } = message;
        self.latest.insert(provider_name, configuration);

        let merged = merge_configurations(&self.latest);
        let changed = self.live.send_if_modified(|current| {
            if **current == merged {
                return false;
            }
            *current = Arc::new(merged);
            true
        });

        if changed {
            let live = self.live.borrow();
            counter!(CONFIGURATION_UPDATES).increment(1);
            gauge!(LIVE_ROUTERS).set(live.http.routers.len() as f64);
            gauge!(LIVE_SERVICES).set(live.http.services.len() as f64);
        }
        changed
    }

    /// Consumes provider messages until `shutdown` is cancelled or every
    /// provider is gone.
    pub async fn run(mut self, mut messages: mpsc::Receiver<Message>, shutdown: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = messages.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let provider = message.provider_name.clone();
            if self.apply(message) {
                let live = self.live.borrow();
                tracing::info!(
                    provider = %provider,
                    routers = live.http.routers.len(),
                    services = live.http.services.len(),
                    "Live configuration updated"
                );
            } else {
                tracing::debug!(provider = %provider, "Live configuration unchanged");
            }
        }
        tracing::info!("Aggregator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynamic::{
        CertAndStores, Certificate, Headers, Middleware, Router, Server, ServersLoadBalancer,
        Service, WeightedRoundRobin, WrrService,
    };

    fn message(provider: &str, configuration: Configuration) -> Message {
        Message {
            provider_name: provider.into(),
            configuration,
        }
    }

    fn routed(host: &str, service: &str) -> Configuration {
        let mut conf = Configuration::new();
        conf.http.routers.insert(
            "router".into(),
            Router {
                rule: format!("(Host(`{host}`))"),
                middlewares: vec!["headers".into()],
                service: service.into(),
                ..Default::default()
            },
        );
        conf.http
            .middlewares
            .insert("headers".into(), Middleware::Headers(Headers::default()));
        conf.http.services.insert(
            "wrr".into(),
            Service::Weighted(WeightedRoundRobin {
                services: vec![WrrService {
                    name: "backend".into(),
                    weight: Some(100),
                    headers: None,
                }],
                sticky: None,
            }),
        );
        conf.http.services.insert(
            "backend".into(),
            Service::LoadBalancer(ServersLoadBalancer::new(vec![Server::new(
                "http://10.0.0.1:80",
            )])),
        );
        conf
    }

    #[test]
    fn test_names_are_qualified_with_the_provider() {
        let (mut aggregator, live) = Aggregator::new();
        assert!(aggregator.apply(message("knative", routed("a.example.com", "wrr"))));

        let live = live.borrow();
        let router = &live.http.routers["router@knative"];
        assert_eq!(router.service, "wrr@knative");
        assert_eq!(router.middlewares, vec!["headers@knative"]);
        assert!(live.http.middlewares.contains_key("headers@knative"));

        let Service::Weighted(wrr) = &live.http.services["wrr@knative"] else {
            panic!("expected a weighted service");
        };
        assert_eq!(wrr.services[0].name, "backend@knative");
        assert!(live.http.services.contains_key("backend@knative"));
    }

    #[test]
    fn test_cross_provider_references_are_kept() {
        let (mut aggregator, live) = Aggregator::new();
        aggregator.apply(message("file", routed("a.example.com", "backend@knative")));

        assert_eq!(
            live.borrow().http.routers["router@file"].service,
            "backend@knative"
        );
    }

    #[test]
    fn test_latest_snapshot_per_provider() {
        let (mut aggregator, live) = Aggregator::new();
        aggregator.apply(message("knative", routed("a.example.com", "wrr")));
        aggregator.apply(message("file", routed("b.example.com", "wrr")));
        assert_eq!(live.borrow().http.routers.len(), 2);

        aggregator.apply(message("knative", routed("c.example.com", "wrr")));
        let current = live.borrow().clone();
        assert_eq!(current.http.routers.len(), 2);
        assert_eq!(
            current.http.routers["router@knative"].rule,
            "(Host(`c.example.com`))"
        );
        assert_eq!(
            current.http.routers["router@file"].rule,
            "(Host(`b.example.com`))"
        );

        // An empty snapshot clears what the provider contributed.
        aggregator.apply(message("knative", Configuration::new()));
        assert_eq!(live.borrow().http.routers.len(), 1);
    }

    #[test]
    fn test_unchanged_merge_is_not_republished() {
        let (mut aggregator, mut live) = Aggregator::new();
        assert!(aggregator.apply(message("file", routed("a.example.com", "wrr"))));
        live.mark_unchanged();

        assert!(!aggregator.apply(message("file", routed("a.example.com", "wrr"))));
        assert!(!live.has_changed().unwrap());
    }

    #[test]
    fn test_certificates_are_concatenated() {
        let certificate = |name: &str| CertAndStores {
            certificate: Certificate {
                cert_file: format!("{name}.crt"),
                key_file: format!("{name}.key"),
            },
            stores: Vec::new(),
        };
        let with_cert = |name: &str| Configuration {
            tls: Some(TlsConfiguration {
                certificates: vec![certificate(name)],
            }),
            ..Default::default()
        };

        let latest = BTreeMap::from([
            ("knative".to_string(), with_cert("knative")),
            ("file".to_string(), with_cert("file")),
        ]);
        let merged = merge_configurations(&latest);
        let files: Vec<_> = merged
            .tls
            .unwrap()
            .certificates
            .into_iter()
            .map(|c| c.certificate.cert_file)
            .collect();
        assert_eq!(files, vec!["file.crt", "knative.crt"]);
    }

    #[tokio::test]
    async fn test_run_until_providers_are_gone() {
        let (aggregator, mut live) = Aggregator::new();
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(aggregator.run(rx, CancellationToken::new()));

        tx.send(message("file", routed("a.example.com", "wrr")))
            .await
            .unwrap();
        live.changed().await.unwrap();
        assert!(live.borrow().http.routers.contains_key("router@file"));

        drop(tx);
        handle.await.unwrap();
    }
}
