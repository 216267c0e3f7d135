//! Dynamic configuration shared by every provider and by the aggregator.
//!
//! A [`Configuration`] is a complete, immutable routing snapshot. Providers
//! build a fresh one on every reconciliation pass, fingerprint it to decide
//! whether it must be published, and hand it off to the aggregator.

pub mod config;
pub mod fingerprint;
pub mod merge;
pub mod rule;

pub use config::{
    CertAndStores, Certificate, Configuration, Headers, HttpConfiguration, Middleware,
    MirrorService, Mirroring, RedirectScheme, ResponseForwarding, Router, RouterTlsConfig, Server,
    ServersLoadBalancer, Service, Sticky, TlsConfiguration, WeightedRoundRobin, WrrService,
};
pub use fingerprint::{Change, ChangeDetector, Fingerprint, FingerprintError, fingerprint};
pub use merge::merge_http;
pub use rule::build_rule;
