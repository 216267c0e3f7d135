//! The reconciliation cycle shared by every provider.
//!
//! ```text
//! Connecting ──ok──▶ Watching ──event──▶ Rebuilding ──▶ Publishing ──▶ sleep ──▶ Watching
//!     ▲                  │                                   │
//!     └── backoff ◀── Failed (watch error, closed stream, panic)    └─▶ status updates (spawned)
//! ```
//!
//! A cycle is strictly sequential: the next event is not consumed before the
//! previous publish and its throttle sleep completed. Every suspension point
//! is raced against the shutdown token.

use crate::backoff::{JobBackoff, RetryError, retry_notify};
use crate::metrics_defs::{
    CONNECTION_ERRORS, PUBLISH_SENT, PUBLISH_SKIPPED, REBUILD_DURATION, STATUS_FAILURES,
};
use crate::throttle::throttle_events;
use crate::{Message, ProviderError, Snapshot, Source};
use dynamic::{Change, ChangeDetector};
use futures::FutureExt;
use parking_lot::Mutex;
use shared::{counter, histogram};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

const WATCH_ERROR_DELAY: Duration = Duration::from_secs(1);

/// How a watch attempt ended without an error.
#[derive(Debug, PartialEq)]
enum Exit {
    Shutdown,
    ChannelClosed,
}

pub struct ProviderLoop<S: Source> {
    source: Arc<S>,
    throttle_duration: Duration,
    backoff: JobBackoff,
    // Fingerprint of the last published snapshot. Survives reconnections.
    last_published: Mutex<ChangeDetector>,
}

impl<S: Source> ProviderLoop<S> {
    pub fn new(source: S, throttle_duration: Duration) -> Self {
        Self {
            source: Arc::new(source),
            throttle_duration,
            backoff: JobBackoff::default(),
            last_published: Mutex::new(ChangeDetector::new()),
        }
    }

    pub fn with_backoff(mut self, backoff: JobBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Runs until `shutdown` is cancelled or the configuration channel is closed.
    /// Connection failures are retried forever.
    pub async fn run(&self, sender: mpsc::Sender<Message>, shutdown: CancellationToken) {
        let name = self.source.name();
        let sender = &sender;
        let shutdown = &shutdown;

        let operation = move || async move {
            match AssertUnwindSafe(self.watch_and_reconcile(sender, shutdown))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(ProviderError::Panicked(panic_message(panic.as_ref()))),
            }
        };

        let notify = |err: &ProviderError, delay: Duration| {
            tracing::error!(provider = name, error = %err, retry_in = ?delay, "Provider connection error, retrying");
            counter!(CONNECTION_ERRORS, "provider" => name.to_string()).increment(1);
        };

        match retry_notify(operation, self.backoff.clone(), shutdown, notify).await {
            Ok(Exit::Shutdown) | Err(RetryError::Cancelled) => {
                tracing::info!(provider = name, "Provider stopped");
            }
            Ok(Exit::ChannelClosed) => {
                tracing::error!(provider = name, "Configuration channel closed, provider stopped");
            }
            Err(RetryError::Exhausted(err)) => {
                tracing::error!(provider = name, error = %err, "Cannot connect to provider");
            }
        }
    }

    async fn watch_and_reconcile(
        &self,
        sender: &mpsc::Sender<Message>,
        shutdown: &CancellationToken,
    ) -> Result<Exit, ProviderError> {
        let name = self.source.name();

        let events = match self.source.watch(shutdown).await {
            Ok(events) => events,
            Err(err) => {
                tracing::error!(provider = name, error = %err, "Error watching provider events");
                tokio::select! {
                    _ = sleep(WATCH_ERROR_DELAY) => return Err(err),
                    _ = shutdown.cancelled() => return Ok(Exit::Shutdown),
                }
            }
        };

        // Stops the throttling relay of this attempt when it ends.
        let attempt = shutdown.child_token();
        let _attempt_guard = attempt.clone().drop_guard();
        let mut events = throttle_events(name, self.throttle_duration, events, attempt);

        loop {
            // Shutdown also closes the stream; it must win over the closed stream.
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(Exit::Shutdown),
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return Err(ProviderError::EventStreamClosed);
            };

            // With throttling this is the first event of its window; later ones may have been dropped.
            if let Some(exit) = self.reconcile(event, sender, shutdown).await {
                return Ok(exit);
            }
        }
    }

    /// One rebuild, publish and status cycle. Returns `Some` when the loop must stop.
    async fn reconcile(
        &self,
        event: S::Event,
        sender: &mpsc::Sender<Message>,
        shutdown: &CancellationToken,
    ) -> Option<Exit> {
        let name = self.source.name();

        let started = Instant::now();
        let Snapshot {
            configuration,
            status_targets,
        } = self.source.load_configuration();
        histogram!(REBUILD_DURATION, "provider" => name.to_string())
            .record(started.elapsed().as_secs_f64());

        let change = self.last_published.lock().observe(&configuration);
        match change {
            Change::Unchanged => {
                tracing::debug!(provider = name, ?event, "Skipping unchanged configuration");
                counter!(PUBLISH_SKIPPED, "provider" => name.to_string()).increment(1);
            }
            Change::Changed => {
                let message = Message {
                    provider_name: name.to_string(),
                    configuration,
                };
                tokio::select! {
                    sent = sender.send(message) => {
                        if sent.is_err() {
                            return Some(Exit::ChannelClosed);
                        }
                        tracing::debug!(provider = name, ?event, "Configuration published");
                        counter!(PUBLISH_SENT, "provider" => name.to_string()).increment(1);
                    }
                    _ = shutdown.cancelled() => return Some(Exit::Shutdown),
                }
            }
        }

        // Bounds how fast this provider refreshes; a zero duration returns at once.
        tokio::select! {
            _ = sleep(self.throttle_duration) => {}
            _ = shutdown.cancelled() => return Some(Exit::Shutdown),
        }

        // Statuses are written after the sleep so the published configuration is live by then.
        self.spawn_status_updates(status_targets, shutdown.clone());
        None
    }

    fn spawn_status_updates(&self, targets: Vec<S::StatusTarget>, shutdown: CancellationToken) {
        if targets.is_empty() {
            return;
        }

        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            let name = source.name();
            for target in targets {
                if shutdown.is_cancelled() {
                    return;
                }
                let description = target.to_string();
                if let Err(err) = source.update_status(target).await {
                    tracing::error!(provider = name, target = %description, error = %err, "Error updating status");
                    counter!(STATUS_FAILURES, "provider" => name.to_string()).increment(1);
                }
            }
        });
    }
}

impl<S: Source> fmt::Debug for ProviderLoop<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderLoop")
            .field("provider", &self.source.name())
            .field("throttle_duration", &self.throttle_duration)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
