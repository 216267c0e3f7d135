//! Metrics definitions for the aggregator.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CONFIGURATION_UPDATES: MetricDef = MetricDef {
    name: "aggregator.configuration.updates",
    metric_type: MetricType::Counter,
    description: "Number of times the live configuration changed",
};

pub const LIVE_ROUTERS: MetricDef = MetricDef {
    name: "aggregator.routers",
    metric_type: MetricType::Gauge,
    description: "Number of routers in the live configuration",
};

pub const LIVE_SERVICES: MetricDef = MetricDef {
    name: "aggregator.services",
    metric_type: MetricType::Gauge,
    description: "Number of services in the live configuration",
};

pub const ALL_METRICS: &[MetricDef] = &[CONFIGURATION_UPDATES, LIVE_ROUTERS, LIVE_SERVICES];
