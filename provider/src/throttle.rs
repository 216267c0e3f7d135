//! Coalescing of bursty watch events.
//!
//! The relay moves events from the unbounded watch channel into a channel with
//! a single slot. While the slot holds an undelivered event, new events are
//! dropped. A delivered event therefore means "something changed since the
//! last delivery", never which change.

use crate::metrics_defs::EVENTS_DROPPED;
use shared::counter;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Events consumed by a provider loop, either straight from the watch or
/// through the throttling relay.
#[derive(Debug)]
pub enum EventStream<T> {
    Raw(mpsc::UnboundedReceiver<T>),
    Throttled(mpsc::Receiver<T>),
}

impl<T> EventStream<T> {
    /// Waits for the next event. `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<T> {
        match self {
            EventStream::Raw(rx) => rx.recv().await,
            EventStream::Throttled(rx) => rx.recv().await,
        }
    }
}

/// Wraps `events` in a relay when `duration` is non-zero.
///
/// The relay task ends when `shutdown` is cancelled, when the watch channel
/// closes, or when the returned stream is dropped.
pub fn throttle_events<T>(
    provider_name: &str,
    duration: Duration,
    mut events: mpsc::UnboundedReceiver<T>,
    shutdown: CancellationToken,
) -> EventStream<T>
where
    T: fmt::Debug + Send + 'static,
{
    if duration.is_zero() {
        return EventStream::Raw(events);
    }

    let (tx, rx) = mpsc::channel(1);
    let provider_name = provider_name.to_string();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => return,
                },
            };

            match tx.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    // A refresh is already pending and every event triggers the same rebuild.
                    tracing::debug!(provider = %provider_name, ?event, "Dropping event due to throttling");
                    counter!(EVENTS_DROPPED, "provider" => provider_name.clone()).increment(1);
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    });

    EventStream::Throttled(rx)
}
