use crate::config::{LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const METRICS_PREFIX: &str = "edge";

#[derive(thiserror::Error, Debug)]
pub enum ObservabilityError {
    #[error("cannot build statsd recorder: {0}")]
    Statsd(#[from] metrics_exporter_statsd::StatsdError),
    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}

/// Installs the global subscriber. The returned guard flushes pending Sentry
/// events when dropped and must live as long as the process.
pub fn init_logging(config: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

/// Installs the statsd recorder and describes every known metric. Without a
/// configuration metrics are discarded.
pub fn init_metrics(config: Option<&MetricsConfig>) -> Result<(), ObservabilityError> {
    let Some(config) = config else {
        tracing::info!("No metrics backend configured");
        return Ok(());
    };

    let recorder = StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(Some(METRICS_PREFIX))?;
    metrics::set_global_recorder(recorder).map_err(|_| ObservabilityError::RecorderInstalled)?;

    shared::metrics_defs::describe_all(provider::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(crate::metrics_defs::ALL_METRICS);
    tracing::info!(host = %config.statsd_host, port = config.statsd_port, "Sending metrics to statsd");
    Ok(())
}
