use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_FLUSH_INTERVAL: &str = "100ms";

fn default_true() -> bool {
    true
}

fn default_flush_interval() -> String {
    DEFAULT_FLUSH_INTERVAL.to_string()
}

/// A complete routing snapshot produced by one provider (or by the aggregator).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub http: HttpConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfiguration>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the snapshot carries no routers, middlewares, services or certificates.
    pub fn is_empty(&self) -> bool {
        self.http.is_empty()
            && self
                .tls
                .as_ref()
                .is_none_or(|tls| tls.certificates.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfiguration {
    #[serde(default)]
    pub routers: BTreeMap<String, Router>,
    #[serde(default)]
    pub middlewares: BTreeMap<String, Middleware>,
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
}

impl HttpConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty() && self.middlewares.is_empty() && self.services.is_empty()
    }

    /// Copies every entry of `other` into `self`. Keys already present are overwritten.
    pub fn extend(&mut self, other: HttpConfiguration) {
        self.routers.extend(other.routers);
        self.middlewares.extend(other.middlewares);
        self.services.extend(other.services);
    }
}

/// Binds a rule to a service through an ordered middleware chain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    /// Listener groups the rule applies to, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,
    pub rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<String>,
    /// Key of the service this router dispatches to, in the same snapshot.
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouterTlsConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterTlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_resolver: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Service {
    LoadBalancer(ServersLoadBalancer),
    Weighted(WeightedRoundRobin),
    Mirroring(Mirroring),
}

impl Service {
    /// Names of the other services this one forwards to.
    pub fn references_mut(&mut self) -> Vec<&mut String> {
        match self {
            Service::LoadBalancer(_) => Vec::new(),
            Service::Weighted(wrr) => wrr.services.iter_mut().map(|s| &mut s.name).collect(),
            Service::Mirroring(mirroring) => std::iter::once(&mut mirroring.service)
                .chain(mirroring.mirrors.iter_mut().map(|m| &mut m.name))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServersLoadBalancer {
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default = "default_true")]
    pub pass_host_header: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_forwarding: Option<ResponseForwarding>,
}

impl ServersLoadBalancer {
    /// A load balancer over `servers` with the router defaults applied.
    pub fn new(servers: Vec<Server>) -> Self {
        Self {
            servers,
            pass_host_header: true,
            response_forwarding: Some(ResponseForwarding::default()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseForwarding {
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,
}

impl Default for ResponseForwarding {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub url: String,
}

impl Server {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedRoundRobin {
    #[serde(default)]
    pub services: Vec<WrrService>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticky: Option<Sticky>,
}

/// One weighted entry of a [`WeightedRoundRobin`] service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrrService {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    /// Request headers added when this entry is selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sticky {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Cookie>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mirroring {
    pub service: String,
    #[serde(default)]
    pub mirrors: Vec<MirrorService>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_body_size: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorService {
    pub name: String,
    pub percent: u32,
}

/// Middleware kinds. The pipeline stores them by key and never looks inside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Middleware {
    Headers(Headers),
    AddPrefix(AddPrefix),
    StripPrefix(StripPrefix),
    RedirectScheme(RedirectScheme),
    BasicAuth(BasicAuth),
    Retry(Retry),
    Compress(Compress),
    Plugin(BTreeMap<String, serde_json::Value>),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Headers {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_request_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_response_headers: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPrefix {
    pub prefix: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripPrefix {
    #[serde(default)]
    pub prefixes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectScheme {
    pub scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(default)]
    pub remove_header: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retry {
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_interval: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compress {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_content_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_response_body_bytes: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfiguration {
    #[serde(default)]
    pub certificates: Vec<CertAndStores>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertAndStores {
    #[serde(flatten)]
    pub certificate: Certificate,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stores: Vec<String>,
}

/// PEM encoded certificate and private key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub cert_file: String,
    pub key_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dynamic_configuration() {
        let yaml = r#"
http:
  routers:
    whoami:
      entryPoints: [web]
      rule: "Host(`whoami.example.com`)"
      middlewares: [strip]
      service: whoami-wrr
  middlewares:
    strip:
      stripPrefix:
        prefixes: ["/api"]
  services:
    whoami-wrr:
      weighted:
        services:
          - name: whoami-v1
            weight: 80
          - name: whoami-v2
            weight: 20
            headers:
              X-Canary: "true"
    whoami-v1:
      loadBalancer:
        servers:
          - url: http://10.0.0.1:80
    whoami-v2:
      loadBalancer:
        passHostHeader: false
        servers:
          - url: http://10.0.0.2:80
tls:
  certificates:
    - certFile: "cert"
      keyFile: "key"
"#;

        let config: Configuration = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(yaml),
        )
        .unwrap();
        assert_eq!(config.http.routers.len(), 1);
        assert_eq!(config.http.services.len(), 3);
        assert_eq!(config.http.routers["whoami"].entry_points, vec!["web"]);

        let Service::Weighted(wrr) = &config.http.services["whoami-wrr"] else {
            panic!("expected a weighted service");
        };
        assert_eq!(wrr.services[0].weight, Some(80));
        assert_eq!(
            wrr.services[1].headers.as_ref().unwrap()["X-Canary"],
            "true"
        );

        let Service::LoadBalancer(lb) = &config.http.services["whoami-v1"] else {
            panic!("expected a load balancer");
        };
        assert!(lb.pass_host_header);
        let Service::LoadBalancer(lb) = &config.http.services["whoami-v2"] else {
            panic!("expected a load balancer");
        };
        assert!(!lb.pass_host_header);

        assert!(matches!(
            config.http.middlewares["strip"],
            Middleware::StripPrefix(_)
        ));
        assert_eq!(config.tls.unwrap().certificates[0].certificate.key_file, "key");
    }

    #[test]
    fn test_empty_configuration() {
        let config: Configuration = serde_yaml::from_str("{}").unwrap();
        assert!(config.is_empty());
        assert!(config.http.routers.is_empty());

        let config = Configuration {
            tls: Some(TlsConfiguration::default()),
            ..Default::default()
        };
        assert!(config.is_empty());
    }

    #[test]
    fn test_service_references() {
        let mut service = Service::Mirroring(Mirroring {
            service: "main".into(),
            mirrors: vec![MirrorService {
                name: "shadow".into(),
                percent: 10,
            }],
            max_body_size: None,
        });
        for name in service.references_mut() {
            name.push_str("@file");
        }
        let Service::Mirroring(mirroring) = service else {
            unreachable!()
        };
        assert_eq!(mirroring.service, "main@file");
        assert_eq!(mirroring.mirrors[0].name, "shadow@file");

        let mut lb = Service::LoadBalancer(ServersLoadBalancer::new(vec![Server::new(
            "http://10.0.0.1",
        )]));
        assert!(lb.references_mut().is_empty());
    }
}
