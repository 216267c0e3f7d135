//! Providers turn change notifications from an external resource system into
//! complete [`Configuration`] snapshots and publish them on a shared channel.
//!
//! ```text
//! watch events → throttle → rebuild → fingerprint gate → configuration channel
//!                                   ↘ (after publish) status reconciliation
//! ```
//!
//! Each provider implements [`Source`]; [`ProviderLoop`] owns the reconciliation
//! cycle and its retry supervision, so every provider honours the same contract.

pub mod backoff;
pub mod file;
pub mod knative;
pub mod metrics_defs;
pub mod provider_loop;
pub mod throttle;
pub mod watch;

use async_trait::async_trait;
use dynamic::Configuration;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use provider_loop::ProviderLoop;
pub use throttle::{EventStream, throttle_events};

/// A published snapshot, tagged with the name of the provider that built it.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub provider_name: String,
    pub configuration: Configuration,
}

/// Result of one full rebuild: the configuration and the source objects whose
/// status should be reconciled once it has been published.
#[derive(Debug)]
pub struct Snapshot<T> {
    pub configuration: Configuration,
    pub status_targets: Vec<T>,
}

impl<T> Snapshot<T> {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            status_targets: Vec::new(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("client error: {0}")]
    Client(#[from] knative::ClientError),
    #[error("filesystem watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("event stream closed")]
    EventStreamClosed,
    #[error("provider panicked: {0}")]
    Panicked(String),
}

/// The part of a provider that knows about its resource system.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Change notification. Only its occurrence matters; it is logged, never inspected.
    type Event: fmt::Debug + Send + 'static;
    /// Source object whose status is written back after a publish.
    type StatusTarget: fmt::Display + Send + 'static;

    fn name(&self) -> &str;

    /// Establishes the watch. Dropping the receiver ends it.
    async fn watch(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<Self::Event>, ProviderError>;

    /// Rebuilds the whole configuration from the current state of the source.
    fn load_configuration(&self) -> Snapshot<Self::StatusTarget>;

    async fn update_status(&self, target: Self::StatusTarget) -> Result<(), ProviderError>;
}
