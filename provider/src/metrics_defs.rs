//! Metrics definitions for the providers.

use shared::metrics_defs::{MetricDef, MetricType};

pub const EVENTS_DROPPED: MetricDef = MetricDef {
    name: "provider.events.dropped",
    metric_type: MetricType::Counter,
    description: "Watch events dropped by the throttler. Tagged with provider.",
};

pub const REBUILD_DURATION: MetricDef = MetricDef {
    name: "provider.rebuild.duration",
    metric_type: MetricType::Histogram,
    description: "Time to rebuild a provider configuration in seconds. Tagged with provider.",
};

pub const PUBLISH_SENT: MetricDef = MetricDef {
    name: "provider.publish.sent",
    metric_type: MetricType::Counter,
    description: "Configurations published on the configuration channel. Tagged with provider.",
};

pub const PUBLISH_SKIPPED: MetricDef = MetricDef {
    name: "provider.publish.skipped",
    metric_type: MetricType::Counter,
    description: "Rebuilds skipped because the configuration did not change. Tagged with provider.",
};

pub const CONNECTION_ERRORS: MetricDef = MetricDef {
    name: "provider.connection.errors",
    metric_type: MetricType::Counter,
    description: "Failed provider connection attempts. Tagged with provider.",
};

pub const STATUS_FAILURES: MetricDef = MetricDef {
    name: "provider.status.failures",
    metric_type: MetricType::Counter,
    description: "Failed status updates of source objects. Tagged with provider.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    EVENTS_DROPPED,
    REBUILD_DURATION,
    PUBLISH_SENT,
    PUBLISH_SKIPPED,
    CONNECTION_ERRORS,
    STATUS_FAILURES,
];
