//! Routing configuration from Knative networking ingresses.
//!
//! Every rebuild lists the ingresses owned by this router, turns each rule
//! path into a router over a weighted service with one load balancer per
//! split, and collects the ingresses whose status must be written back once
//! the configuration is live.

pub mod client;
pub mod manifests;
pub mod resources;
pub mod selector;
pub mod splits;
pub mod status;
pub mod store;

use crate::{ProviderError, Snapshot, Source};
use async_trait::async_trait;
use dynamic::{
    CertAndStores, Certificate, Configuration, Headers, HttpConfiguration, Middleware,
    RedirectScheme, Router, RouterTlsConfig, Server, ServersLoadBalancer, Service,
    TlsConfiguration, build_rule,
};
use resources::{HttpOption, IngressBackend, IngressRule, ObjectKey, Visibility};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use client::{Client, ClientError, NamespaceScope};
pub use resources::{Event, Ingress};
pub use selector::{LabelSelector, SelectorError};
pub use store::{Store, StoreClient};

pub const PROVIDER_NAME: &str = "knative";
pub const INGRESS_CLASS_ANNOTATION: &str = "networking.knative.dev/ingress.class";
pub const INGRESS_CLASS: &str = "traefik.ingress.networking.knative.dev";

const TLS_CERT_FIELD: &str = "tls.crt";
const TLS_KEY_FIELD: &str = "tls.key";

/// A service of the router itself, published in ingress statuses.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug)]
pub struct KnativeOptions {
    pub public_entrypoints: Vec<String>,
    pub public_service: ServiceRef,
    /// Cluster local rules are skipped when empty.
    pub private_entrypoints: Vec<String>,
    /// Defaults to the public service in statuses.
    pub private_service: Option<ServiceRef>,
}

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("cannot get secret {key}: {source}")]
    Secret { key: ObjectKey, source: ClientError },
    #[error("secret {key} has no {field}")]
    MissingSecretData { key: ObjectKey, field: &'static str },
    #[error("secret {key} has an invalid {field}")]
    InvalidSecretData { key: ObjectKey, field: &'static str },
    #[error("cannot get service {key}: {source}")]
    Service { key: ObjectKey, source: ClientError },
    #[error("service {key} has no port {port}")]
    PortNotFound { key: ObjectKey, port: String },
    #[error("service {key} has no cluster IP")]
    MissingClusterIp { key: ObjectKey },
}

/// Everything one ingress contributes to the configuration.
#[derive(Debug, Default)]
struct IngressConfiguration {
    http: HttpConfiguration,
    certificates: BTreeMap<ObjectKey, CertAndStores>,
}

pub struct KnativeProvider<C> {
    client: C,
    options: KnativeOptions,
}

impl<C: Client> KnativeProvider<C> {
    pub fn new(client: C, options: KnativeOptions) -> Self {
        Self { client, options }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Rebuilds the whole configuration from the ingresses currently known.
    pub fn build_configuration(&self) -> Snapshot<Ingress> {
        let mut http = HttpConfiguration::new();
        let mut certificates = BTreeMap::new();
        let mut status_targets = Vec::new();

        for ingress in self.client.list_ingresses() {
            if ingress.annotation(INGRESS_CLASS_ANNOTATION) != Some(INGRESS_CLASS) {
                tracing::debug!(provider = PROVIDER_NAME, ingress = %ingress, "Skipping ingress of another class");
                continue;
            }

            match self.build_ingress(&ingress) {
                Ok(built) => {
                    http.extend(built.http);
                    certificates.extend(built.certificates);
                    status_targets.push(ingress);
                }
                Err(err) => {
                    tracing::error!(provider = PROVIDER_NAME, ingress = %ingress, error = %err, "Skipping ingress");
                }
            }
        }

        let certificates: Vec<CertAndStores> = certificates.into_values().collect();
        Snapshot {
            configuration: Configuration {
                http,
                tls: (!certificates.is_empty()).then_some(TlsConfiguration { certificates }),
            },
            status_targets,
        }
    }

    fn build_ingress(&self, ingress: &Ingress) -> Result<IngressConfiguration, BuildError> {
        let mut built = IngressConfiguration {
            certificates: self.load_certificates(ingress)?,
            ..Default::default()
        };

        for (rule_index, rule) in ingress.spec.rules.iter().enumerate() {
            self.build_ingress_rule(ingress, rule_index, rule, &mut built.http);
        }
        Ok(built)
    }

    fn entrypoints(&self, visibility: Visibility) -> &[String] {
        match visibility {
            Visibility::ClusterLocal => &self.options.private_entrypoints,
            Visibility::ExternalIP => &self.options.public_entrypoints,
        }
    }

    fn build_ingress_rule(
        &self,
        ingress: &Ingress,
        rule_index: usize,
        rule: &IngressRule,
        http: &mut HttpConfiguration,
    ) {
        let Some(rule_http) = &rule.http else {
            tracing::debug!(provider = PROVIDER_NAME, ingress = %ingress, rule = rule_index, "Skipping rule without HTTP section");
            return;
        };

        let entrypoints = self.entrypoints(rule.visibility);
        if entrypoints.is_empty() {
            tracing::debug!(provider = PROVIDER_NAME, ingress = %ingress, rule = rule_index, "Skipping cluster local rule without private entry points");
            return;
        }

        let namespace = &ingress.metadata.namespace;
        for (path_index, path) in rule_http.paths.iter().enumerate() {
            let router_key = format!(
                "{}-{}-rule-{}-path-{}",
                namespace, ingress.metadata.name, rule_index, path_index
            );

            let (wrr, services) =
                match splits::build_weighted_round_robin(&router_key, &path.splits, |backend| {
                    self.build_service(namespace, backend)
                }) {
                    Ok(built) => built,
                    Err(err) => {
                        tracing::error!(provider = PROVIDER_NAME, router = %router_key, error = %err, "Cannot build weighted service");
                        continue;
                    }
                };

            let mut middlewares = Vec::new();
            if !path.append_headers.is_empty() {
                let key = format!("{router_key}-append-headers");
                http.middlewares.insert(
                    key.clone(),
                    Middleware::Headers(Headers {
                        custom_request_headers: path.append_headers.clone(),
                        ..Default::default()
                    }),
                );
                middlewares.push(key);
            }

            let headers: HashMap<String, String> = path
                .headers
                .iter()
                .map(|(name, matcher)| (name.clone(), matcher.exact.clone()))
                .collect();
            let service_key = format!("{router_key}-wrr");
            let mut router = Router {
                entry_points: entrypoints.to_vec(),
                rule: build_rule(&rule.hosts, &headers, &path.path),
                middlewares,
                service: service_key.clone(),
                ..Default::default()
            };

            if !ingress.spec.tls.is_empty() {
                http.routers.insert(
                    format!("{router_key}-tls"),
                    Router {
                        tls: Some(RouterTlsConfig::default()),
                        ..router.clone()
                    },
                );

                // Plain HTTP only redirects once a TLS router serves the same rule.
                if ingress.spec.http_option == HttpOption::Redirected {
                    let key = format!("{router_key}-redirect-scheme");
                    http.middlewares.insert(
                        key.clone(),
                        Middleware::RedirectScheme(RedirectScheme {
                            scheme: "https".into(),
                            port: None,
                            permanent: true,
                        }),
                    );
                    router.middlewares.insert(0, key);
                }
            }
            http.routers.insert(router_key, router);
            http.services.insert(service_key, Service::Weighted(wrr));
            http.services.extend(services);
        }
    }

    fn build_service(
        &self,
        namespace: &str,
        backend: &IngressBackend,
    ) -> Result<Service, BuildError> {
        let namespace: &str = if backend.service_namespace.is_empty() {
            namespace
        } else {
            backend.service_namespace.as_str()
        };
        let key = ObjectKey::new(namespace, &backend.service_name);

        let service = self
            .client
            .get_service(namespace, &backend.service_name)
            .map_err(|source| BuildError::Service {
                key: key.clone(),
                source,
            })?;
        let port = service
            .spec
            .port(&backend.service_port)
            .ok_or_else(|| BuildError::PortNotFound {
                key: key.clone(),
                port: backend.service_port.to_string(),
            })?;

        let cluster_ip = service.spec.cluster_ip.trim();
        if cluster_ip.is_empty() || cluster_ip == "None" {
            return Err(BuildError::MissingClusterIp { key });
        }

        let scheme = match port.name.as_deref() {
            Some("h2c") => "h2c",
            _ => "http",
        };
        Ok(Service::LoadBalancer(ServersLoadBalancer::new(vec![
            Server::new(server_url(scheme, cluster_ip, port.port)),
        ])))
    }

    /// Certificates of the ingress, keyed by secret namespace and name.
    fn load_certificates(
        &self,
        ingress: &Ingress,
    ) -> Result<BTreeMap<ObjectKey, CertAndStores>, BuildError> {
        let namespace = &ingress.metadata.namespace;
        let mut certificates = BTreeMap::new();

        for tls in &ingress.spec.tls {
            if !tls.secret_namespace.is_empty() && tls.secret_namespace != *namespace {
                tracing::debug!(provider = PROVIDER_NAME, ingress = %ingress, secret_namespace = %tls.secret_namespace, "Skipping secret of another namespace");
                continue;
            }

            let key = ObjectKey::new(namespace, &tls.secret_name);
            if certificates.contains_key(&key) {
                continue;
            }

            let secret = self
                .client
                .get_secret(namespace, &tls.secret_name)
                .map_err(|source| BuildError::Secret {
                    key: key.clone(),
                    source,
                })?;
            let certificate = Certificate {
                cert_file: secret_field(&secret, &key, TLS_CERT_FIELD)?,
                key_file: secret_field(&secret, &key, TLS_KEY_FIELD)?,
            };
            certificates.insert(
                key,
                CertAndStores {
                    certificate,
                    stores: Vec::new(),
                },
            );
        }
        Ok(certificates)
    }

    /// Writes back the ready status when the ingress is not configured at its
    /// current generation yet.
    pub async fn update_ingress_status(&self, mut ingress: Ingress) -> Result<(), ClientError> {
        if !status::needs_status_update(&ingress) {
            return Ok(());
        }

        let private = self
            .options
            .private_service
            .as_ref()
            .unwrap_or(&self.options.public_service);
        status::mark_configured(&mut ingress, &self.options.public_service, private);
        self.client.update_ingress_status(&ingress).await?;
        tracing::debug!(provider = PROVIDER_NAME, ingress = %ingress, generation = ingress.metadata.generation, "Ingress status updated");
        Ok(())
    }
}

fn secret_field(
    secret: &resources::Secret,
    key: &ObjectKey,
    field: &'static str,
) -> Result<String, BuildError> {
    let decoded = secret
        .decoded(field)
        .ok_or_else(|| BuildError::MissingSecretData {
            key: key.clone(),
            field,
        })?;
    decoded
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| BuildError::InvalidSecretData {
            key: key.clone(),
            field,
        })
}

fn server_url(scheme: &str, host: &str, port: i32) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("{scheme}://[{ip}]:{port}"),
        _ => format!("{scheme}://{host}:{port}"),
    }
}

#[async_trait]
impl<C: Client> Source for KnativeProvider<C> {
    type Event = resources::Event;
    type StatusTarget = Ingress;

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn watch(
        &self,
        _shutdown: &CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<resources::Event>, ProviderError> {
        Ok(self.client.watch_all().await?)
    }

    fn load_configuration(&self) -> Snapshot<Ingress> {
        self.build_configuration()
    }

    async fn update_status(&self, ingress: Ingress) -> Result<(), ProviderError> {
        Ok(self.update_ingress_status(ingress).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderLoop;
    use crate::knative::resources::{
        CONDITION_NETWORK_CONFIGURED, HeaderMatch, HttpIngressPath, HttpIngressRuleValue,
        IngressBackendSplit, IngressSpec, IngressStatus, IngressTls, IntOrString, ObjectMeta,
        Resource, Secret, ServicePort, ServiceSpec,
    };
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use dynamic::WrrService;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn options() -> KnativeOptions {
        KnativeOptions {
            public_entrypoints: vec!["web".into()],
            public_service: ServiceRef::new("edge", "edge"),
            private_entrypoints: Vec::new(),
            private_service: None,
        }
    }

    fn meta(namespace: &str, name: &str) -> ObjectMeta {
        ObjectMeta {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    fn service(name: &str, cluster_ip: &str) -> Resource {
        Resource::Service(resources::Service {
            metadata: meta("default", name),
            spec: ServiceSpec {
                cluster_ip: cluster_ip.into(),
                ports: vec![ServicePort {
                    name: Some("http".into()),
                    port: 80,
                }],
            },
        })
    }

    fn secret(name: &str) -> Resource {
        Resource::Secret(Secret {
            metadata: meta("default", name),
            data: BTreeMap::from([
                (TLS_CERT_FIELD.to_string(), STANDARD.encode("CERT")),
                (TLS_KEY_FIELD.to_string(), STANDARD.encode("KEY")),
            ]),
        })
    }

    fn split(name: &str, percent: u32) -> IngressBackendSplit {
        IngressBackendSplit {
            backend: IngressBackend {
                service_namespace: "default".into(),
                service_name: name.into(),
                service_port: IntOrString::Int(80),
            },
            percent: Some(percent),
            append_headers: BTreeMap::new(),
        }
    }

    fn ingress(name: &str, splits: Vec<IngressBackendSplit>) -> Ingress {
        let mut metadata = meta("default", name);
        metadata
            .annotations
            .insert(INGRESS_CLASS_ANNOTATION.into(), INGRESS_CLASS.into());
        Ingress {
            metadata,
            spec: IngressSpec {
                rules: vec![IngressRule {
                    hosts: vec!["h".into()],
                    visibility: Visibility::ExternalIP,
                    http: Some(HttpIngressRuleValue {
                        paths: vec![HttpIngressPath {
                            splits,
                            ..Default::default()
                        }],
                    }),
                }],
                ..Default::default()
            },
            status: IngressStatus::default(),
        }
    }

    fn provider(resources: Vec<Resource>, options: KnativeOptions) -> KnativeProvider<StoreClient> {
        let store = Arc::new(Store::new());
        store.replace_all(resources);
        let client = StoreClient::new(
            store,
            NamespaceScope::AllNamespaces,
            LabelSelector::everything(),
        );
        KnativeProvider::new(client, options)
    }

    fn url(service: &Service) -> &str {
        match service {
            Service::LoadBalancer(lb) => &lb.servers[0].url,
            other => panic!("expected a load balancer, got {other:?}"),
        }
    }

    #[test]
    fn test_two_even_splits_single_host() {
        let provider = provider(
            vec![
                Resource::Ingress(ingress(
                    "hello",
                    vec![split("hello-00001", 50), split("hello-00002", 50)],
                )),
                service("hello-00001", "10.0.0.1"),
                service("hello-00002", "10.0.0.2"),
            ],
            options(),
        );

        let snapshot = provider.build_configuration();
        let http = &snapshot.configuration.http;

        assert_eq!(http.routers.len(), 1);
        let router = &http.routers["default-hello-rule-0-path-0"];
        assert_eq!(router.rule, "(Host(`h`))");
        assert_eq!(router.entry_points, vec!["web"]);
        assert_eq!(router.service, "default-hello-rule-0-path-0-wrr");
        assert!(router.middlewares.is_empty());

        let Service::Weighted(wrr) = &http.services["default-hello-rule-0-path-0-wrr"] else {
            panic!("expected a weighted service");
        };
        assert_eq!(
            wrr.services,
            vec![
                WrrService {
                    name: "default-hello-rule-0-path-0-split-0".into(),
                    weight: Some(50),
                    headers: None,
                },
                WrrService {
                    name: "default-hello-rule-0-path-0-split-1".into(),
                    weight: Some(50),
                    headers: None,
                },
            ]
        );
        assert_eq!(http.services.len(), 3);
        assert_eq!(
            url(&http.services["default-hello-rule-0-path-0-split-0"]),
            "http://10.0.0.1:80"
        );
        assert_eq!(
            url(&http.services["default-hello-rule-0-path-0-split-1"]),
            "http://10.0.0.2:80"
        );

        assert!(snapshot.configuration.tls.is_none());
        assert_eq!(snapshot.status_targets.len(), 1);
    }

    #[test]
    fn test_other_ingress_class_is_skipped() {
        let mut foreign = ingress("foreign", vec![split("hello-00001", 100)]);
        foreign
            .metadata
            .annotations
            .insert(INGRESS_CLASS_ANNOTATION.into(), "istio.ingress.networking.knative.dev".into());
        let mut unannotated = ingress("bare", vec![split("hello-00001", 100)]);
        unannotated.metadata.annotations.clear();

        let provider = provider(
            vec![
                Resource::Ingress(foreign),
                Resource::Ingress(unannotated),
                service("hello-00001", "10.0.0.1"),
            ],
            options(),
        );

        let snapshot = provider.build_configuration();
        assert!(snapshot.configuration.is_empty());
        assert!(snapshot.status_targets.is_empty());
    }

    #[test]
    fn test_headers_path_and_append_headers() {
        let mut hello = ingress("hello", vec![split("hello-00001", 100)]);
        let path = &mut hello.spec.rules[0].http.as_mut().unwrap().paths[0];
        path.path = "/api".into();
        path.headers.insert(
            "X-Canary".into(),
            HeaderMatch {
                exact: "true".into(),
            },
        );
        path.append_headers
            .insert("Knative-Serving-Namespace".into(), "default".into());

        let provider = provider(
            vec![Resource::Ingress(hello), service("hello-00001", "10.0.0.1")],
            options(),
        );
        let http = provider.build_configuration().configuration.http;

        let router = &http.routers["default-hello-rule-0-path-0"];
        assert_eq!(
            router.rule,
            "(Host(`h`)) && (Header(`X-Canary`,`true`)) && PathPrefix(`/api`)"
        );
        assert_eq!(
            router.middlewares,
            vec!["default-hello-rule-0-path-0-append-headers"]
        );
        let Middleware::Headers(headers) =
            &http.middlewares["default-hello-rule-0-path-0-append-headers"]
        else {
            panic!("expected a headers middleware");
        };
        assert_eq!(
            headers.custom_request_headers["Knative-Serving-Namespace"],
            "default"
        );

        // A single split always weighs 100.
        let Service::Weighted(wrr) = &http.services["default-hello-rule-0-path-0-wrr"] else {
            panic!("expected a weighted service");
        };
        assert_eq!(wrr.services[0].weight, Some(100));
    }

    #[test]
    fn test_cluster_local_rules() {
        let mut local = ingress("local", vec![split("hello-00001", 100)]);
        local.spec.rules[0].visibility = Visibility::ClusterLocal;
        let resources = vec![Resource::Ingress(local), service("hello-00001", "10.0.0.1")];

        let without_private = provider(resources.clone(), options());
        assert!(
            without_private
                .build_configuration()
                .configuration
                .http
                .routers
                .is_empty()
        );

        let with_private = provider(
            resources,
            KnativeOptions {
                private_entrypoints: vec!["internal".into()],
                ..options()
            },
        );
        let http = with_private.build_configuration().configuration.http;
        assert_eq!(
            http.routers["default-local-rule-0-path-0"].entry_points,
            vec!["internal"]
        );
    }

    #[test]
    fn test_split_error_drops_only_that_router() {
        let mut hello = ingress("hello", vec![split("hello-00001", 100)]);
        let paths = &mut hello.spec.rules[0].http.as_mut().unwrap().paths;
        paths.push(HttpIngressPath {
            path: "/broken".into(),
            splits: vec![split("missing", 100)],
            ..Default::default()
        });
        hello.spec.rules.push(IngressRule {
            hosts: vec!["no-http".into()],
            ..Default::default()
        });

        let provider = provider(
            vec![Resource::Ingress(hello), service("hello-00001", "10.0.0.1")],
            options(),
        );
        let snapshot = provider.build_configuration();
        let routers: Vec<_> = snapshot.configuration.http.routers.keys().collect();
        assert_eq!(routers, vec!["default-hello-rule-0-path-0"]);
        assert_eq!(snapshot.status_targets.len(), 1);
    }

    #[test]
    fn test_tls_routers_and_certificates() {
        let mut hello = ingress("hello", vec![split("hello-00001", 100)]);
        hello.spec.tls = vec![
            IngressTls {
                hosts: vec!["h".into()],
                secret_name: "hello-tls".into(),
                secret_namespace: "default".into(),
            },
            IngressTls {
                hosts: vec!["h".into()],
                secret_name: "hello-tls".into(),
                secret_namespace: String::new(),
            },
            IngressTls {
                hosts: vec!["h".into()],
                secret_name: "elsewhere".into(),
                secret_namespace: "kube-system".into(),
            },
        ];

        let provider = provider(
            vec![
                Resource::Ingress(hello),
                service("hello-00001", "10.0.0.1"),
                secret("hello-tls"),
            ],
            options(),
        );
        let configuration = provider.build_configuration().configuration;

        let plain = &configuration.http.routers["default-hello-rule-0-path-0"];
        let secure = &configuration.http.routers["default-hello-rule-0-path-0-tls"];
        assert_eq!(plain.tls, None);
        assert_eq!(secure.tls, Some(RouterTlsConfig::default()));
        assert_eq!(secure.rule, plain.rule);
        assert_eq!(secure.service, plain.service);

        let certificates = configuration.tls.unwrap().certificates;
        assert_eq!(certificates.len(), 1);
        assert_eq!(certificates[0].certificate.cert_file, "CERT");
        assert_eq!(certificates[0].certificate.key_file, "KEY");
    }

    #[test]
    fn test_certificates_keyed_by_namespace_and_secret_name() {
        let tls_secret = |namespace: &str, name: &str, cert: &str| {
            Resource::Secret(Secret {
                metadata: meta(namespace, name),
                data: BTreeMap::from([
                    (TLS_CERT_FIELD.to_string(), STANDARD.encode(cert)),
                    (TLS_KEY_FIELD.to_string(), STANDARD.encode("KEY")),
                ]),
            })
        };
        let tls_ingress = |namespace: &str, secret_name: &str| {
            let mut built = ingress("hello", vec![split("hello-00001", 100)]);
            built.metadata.namespace = namespace.into();
            built.spec.tls = vec![IngressTls {
                hosts: vec!["h".into()],
                secret_name: secret_name.into(),
                secret_namespace: String::new(),
            }];
            Resource::Ingress(built)
        };

        // Both pairs join to `a-b-c` with a dash.
        let provider = provider(
            vec![
                tls_ingress("a-b", "c"),
                tls_ingress("a", "b-c"),
                tls_secret("a-b", "c", "CERT-ONE"),
                tls_secret("a", "b-c", "CERT-TWO"),
                service("hello-00001", "10.0.0.1"),
            ],
            options(),
        );
        let configuration = provider.build_configuration().configuration;

        let mut certs: Vec<_> = configuration
            .tls
            .unwrap()
            .certificates
            .into_iter()
            .map(|cert| cert.certificate.cert_file)
            .collect();
        certs.sort();
        assert_eq!(certs, vec!["CERT-ONE", "CERT-TWO"]);
    }

    #[test]
    fn test_redirected_http_option() {
        let mut hello = ingress("hello", vec![split("hello-00001", 100)]);
        hello.spec.http_option = HttpOption::Redirected;
        hello.spec.tls = vec![IngressTls {
            hosts: vec!["h".into()],
            secret_name: "hello-tls".into(),
            secret_namespace: String::new(),
        }];
        let mut plain_only = ingress("plain", vec![split("hello-00001", 100)]);
        plain_only.spec.http_option = HttpOption::Redirected;

        let provider = provider(
            vec![
                Resource::Ingress(hello),
                Resource::Ingress(plain_only),
                service("hello-00001", "10.0.0.1"),
                secret("hello-tls"),
            ],
            options(),
        );
        let http = provider.build_configuration().configuration.http;

        let key = "default-hello-rule-0-path-0-redirect-scheme";
        assert_eq!(
            http.routers["default-hello-rule-0-path-0"].middlewares,
            vec![key]
        );
        assert!(
            http.routers["default-hello-rule-0-path-0-tls"]
                .middlewares
                .is_empty()
        );
        let Middleware::RedirectScheme(redirect) = &http.middlewares[key] else {
            panic!("expected a redirect middleware");
        };
        assert_eq!(redirect.scheme, "https");
        assert!(redirect.permanent);

        // Without TLS there is nothing to redirect to.
        assert!(
            http.routers["default-plain-rule-0-path-0"]
                .middlewares
                .is_empty()
        );
        assert_eq!(http.middlewares.len(), 1);
    }

    #[test]
    fn test_missing_secret_skips_ingress() {
        let mut hello = ingress("hello", vec![split("hello-00001", 100)]);
        hello.spec.tls = vec![IngressTls {
            hosts: vec!["h".into()],
            secret_name: "missing".into(),
            secret_namespace: "default".into(),
        }];
        let other = ingress("other", vec![split("hello-00001", 100)]);

        let provider = provider(
            vec![
                Resource::Ingress(hello),
                Resource::Ingress(other),
                service("hello-00001", "10.0.0.1"),
            ],
            options(),
        );
        let snapshot = provider.build_configuration();

        let routers: Vec<_> = snapshot.configuration.http.routers.keys().collect();
        assert_eq!(routers, vec!["default-other-rule-0-path-0"]);
        assert_eq!(snapshot.status_targets.len(), 1);
        assert_eq!(snapshot.status_targets[0].metadata.name, "other");
    }

    #[test]
    fn test_server_urls() {
        assert_eq!(server_url("http", "10.0.0.1", 80), "http://10.0.0.1:80");
        assert_eq!(server_url("h2c", "fd00::1", 8080), "h2c://[fd00::1]:8080");
    }

    #[test]
    fn test_service_errors() {
        let provider = provider(
            vec![
                service("hello-00001", "10.0.0.1"),
                service("headless", "None"),
            ],
            options(),
        );
        let backend = |name: &str, port: IntOrString| IngressBackend {
            service_namespace: String::new(),
            service_name: name.into(),
            service_port: port,
        };

        let named_port = backend("hello-00001", IntOrString::String("http".into()));
        assert!(matches!(
            provider.build_service("default", &named_port),
            Ok(Service::LoadBalancer(_))
        ));
        assert!(matches!(
            provider.build_service("default", &backend("hello-00001", IntOrString::Int(443))),
            Err(BuildError::PortNotFound { .. })
        ));
        assert!(matches!(
            provider.build_service("default", &backend("headless", IntOrString::Int(80))),
            Err(BuildError::MissingClusterIp { .. })
        ));
        assert!(matches!(
            provider.build_service("default", &backend("missing", IntOrString::Int(80))),
            Err(BuildError::Service { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_written_once_per_generation() {
        let provider = provider(
            vec![
                Resource::Ingress(ingress("hello", vec![split("hello-00001", 100)])),
                service("hello-00001", "10.0.0.1"),
            ],
            options(),
        );
        let store_ingress = || provider.client().list_ingresses().remove(0);

        provider.update_ingress_status(store_ingress()).await.unwrap();
        let updated = store_ingress();
        assert!(updated.status.is_true(CONDITION_NETWORK_CONFIGURED));
        assert_eq!(updated.status.observed_generation, 1);
        assert_eq!(
            updated.status.private_load_balancer.unwrap().ingress[0].domain_internal,
            Some("edge.edge.svc.cluster.local".to_string())
        );

        let mut events = provider.client().watch_all().await.unwrap();
        while events.try_recv().is_ok() {}

        // Already configured at this generation: nothing is written.
        provider.update_ingress_status(store_ingress()).await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_provider_loop_publishes_and_marks_ready() {
        let store = Arc::new(Store::new());
        store.replace_all(vec![
            Resource::Ingress(ingress("hello", vec![split("hello-00001", 100)])),
            service("hello-00001", "10.0.0.1"),
        ]);
        let client = StoreClient::new(
            store.clone(),
            NamespaceScope::Scoped(vec!["default".into()]),
            LabelSelector::everything(),
        );
        let provider = Arc::new(ProviderLoop::new(
            KnativeProvider::new(client, options()),
            Duration::from_millis(10),
        ));

        let (tx, mut rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let handle = {
            let provider = provider.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { provider.run(tx, shutdown).await })
        };

        let wait = Duration::from_secs(5);
        let message = timeout(wait, rx.recv()).await.unwrap().unwrap();
        assert_eq!(message.provider_name, PROVIDER_NAME);
        assert_eq!(message.configuration.http.routers.len(), 1);

        let key = ObjectKey::new("default", "hello");
        timeout(wait, async {
            while store
                .ingress(&key)
                .is_some_and(|ingress| status::needs_status_update(&ingress))
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // A new backend is picked up by a rebuild.
        store.apply(service("hello-00001", "10.0.0.9"));
        let message = timeout(wait, rx.recv()).await.unwrap().unwrap();
        let service = &message.configuration.http.services["default-hello-rule-0-path-0-split-0"];
        assert_eq!(url(service), "http://10.0.0.9:80");

        shutdown.cancel();
        handle.await.unwrap();
    }
}
