//! Exponential backoff with jitter and the retry policy built on it.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;
const DEFAULT_MULTIPLIER: f64 = 1.5;
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(15 * 60);
const DEFAULT_MIN_JOB_INTERVAL: Duration = Duration::from_secs(30);

pub trait Backoff: Send {
    /// Delay before the next attempt, or `None` to stop retrying.
    fn next_backoff(&mut self) -> Option<Duration>;

    fn reset(&mut self);
}

/// Intervals grow by `multiplier` up to `max_interval`. Each returned delay is
/// randomized within `interval * (1 ± randomization_factor)`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub randomization_factor: f64,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// `None` retries forever.
    pub max_elapsed_time: Option<Duration>,
    current_interval: Duration,
    started_at: Instant,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: Some(DEFAULT_MAX_ELAPSED_TIME),
            current_interval: DEFAULT_INITIAL_INTERVAL,
            started_at: Instant::now(),
        }
    }
}

impl ExponentialBackoff {
    /// Zero returns the exact intervals.
    pub fn with_randomization_factor(mut self, randomization_factor: f64) -> Self {
        self.randomization_factor = randomization_factor;
        self
    }

    /// Time since the last reset.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn randomize(&self, interval: Duration) -> Duration {
        let delta = self.randomization_factor * interval.as_secs_f64();
        if delta <= 0.0 {
            return interval;
        }
        let low = (interval.as_secs_f64() - delta).max(0.0);
        let high = interval.as_secs_f64() + delta;
        Duration::from_secs_f64(rand::thread_rng().gen_range(low..=high))
    }

    fn increment_interval(&mut self) {
        let next = self.current_interval.as_secs_f64() * self.multiplier;
        self.current_interval = if next >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(next)
        };
    }
}

impl Backoff for ExponentialBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time
            && self.elapsed() + self.current_interval > max_elapsed
        {
            return None;
        }

        let delay = self.randomize(self.current_interval);
        self.increment_interval();
        Some(delay)
    }

    fn reset(&mut self) {
        self.current_interval = self.initial_interval;
        self.started_at = Instant::now();
    }
}

/// Backoff for long running jobs: a job that failed after running for at
/// least `min_job_interval` starts again from the initial interval.
#[derive(Debug, Clone)]
pub struct JobBackoff {
    inner: ExponentialBackoff,
    min_job_interval: Duration,
}

impl JobBackoff {
    /// Wraps `inner`, removing its elapsed time limit.
    pub fn new(mut inner: ExponentialBackoff) -> Self {
        inner.max_elapsed_time = None;
        Self {
            inner,
            min_job_interval: DEFAULT_MIN_JOB_INTERVAL,
        }
    }
}

impl Default for JobBackoff {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

impl Backoff for JobBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.inner.elapsed() >= self.min_job_interval {
            self.inner.reset();
        }
        self.inner.next_backoff()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// The backoff gave up; holds the last error.
    Exhausted(E),
    Cancelled,
}

/// Runs `operation` until it succeeds, the backoff gives up, or `shutdown` is
/// cancelled. `notify` is called with each error and the delay before the
/// next attempt.
pub async fn retry_notify<T, E, F, Fut, B, N>(
    mut operation: F,
    mut backoff: B,
    shutdown: &CancellationToken,
    mut notify: N,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: Backoff,
    N: FnMut(&E, Duration),
{
    backoff.reset();

    loop {
        if shutdown.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(delay) = backoff.next_backoff() else {
            return Err(RetryError::Exhausted(err));
        };
        notify(&err, delay);

        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.cancelled() => return Err(RetryError::Cancelled),
        }
    }
}
