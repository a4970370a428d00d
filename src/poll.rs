//! Bounded polling against a remote system
//!
//! `PollSpec::run_until` invokes a probe on a fixed cadence until it reports
//! success or the deadline expires. Every cluster wait in this crate goes
//! through it.
//!
//! # Example
//!
//! ```ignore
//! use node_e2e::poll::{PollSpec, ProbeResult};
//! use std::time::Duration;
//!
//! let pod = PollSpec::new(Duration::from_secs(60), Duration::from_secs(3))
//!     .run_until(|| async {
//!         match pods.get_opt("worker").await {
//!             Ok(Some(pod)) if conditions::pod_ready(&pod) => ProbeResult::ready(Some(pod)),
//!             _ => ProbeResult::pending(None),
//!         }
//!     })
//!     .await?;
//! ```
//!
//! # Defaults
//!
//! A zero `timeout` resolves to [`DEFAULT_TIMEOUT`] and a zero `interval` to
//! [`DEFAULT_INTERVAL`]. Passing `Duration::ZERO` is the supported way to ask
//! for the defaults.

use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::debug;

/// Timeout used when a `PollSpec` carries a zero timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval used when a `PollSpec` carries a zero interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Error returned by [`PollSpec::run_until`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("deadline exceeded: condition not met within {timeout:?} ({attempts} probes over {elapsed:?})")]
    DeadlineExceeded {
        timeout: Duration,
        elapsed: Duration,
        attempts: u32,
    },
}

/// When the first probe runs relative to the call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FirstProbe {
    /// First probe at `t = interval`, never at call time
    #[default]
    AfterInterval,
    /// First probe at `t = 0`
    Immediately,
}

/// Outcome of a single probe invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult<T> {
    pub value: T,
    pub satisfied: bool,
}

impl<T> ProbeResult<T> {
    /// The awaited condition holds; polling stops and `value` is returned
    pub fn ready(value: T) -> Self {
        Self {
            value,
            satisfied: true,
        }
    }

    /// Not there yet; keep polling
    pub fn pending(value: T) -> Self {
        Self {
            value,
            satisfied: false,
        }
    }
}

impl From<bool> for ProbeResult<()> {
    fn from(satisfied: bool) -> Self {
        Self {
            value: (),
            satisfied,
        }
    }
}

/// Deadline and cadence for one polling run
///
/// `PollSpec` is `Copy` and holds no deadline state of its own; each
/// `run_until` call derives a fresh deadline and drops it on return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub timeout: Duration,
    pub interval: Duration,
    pub first_probe: FirstProbe,
}

impl Default for PollSpec {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            first_probe: FirstProbe::AfterInterval,
        }
    }
}

impl PollSpec {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            first_probe: FirstProbe::AfterInterval,
        }
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the interval between probes
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the first probe at call time instead of after one interval
    #[must_use]
    pub fn immediately(mut self) -> Self {
        self.first_probe = FirstProbe::Immediately;
        self
    }

    /// Timeout after default substitution
    pub fn resolved_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }

    /// Interval after default substitution
    pub fn resolved_interval(&self) -> Duration {
        if self.interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            self.interval
        }
    }

    /// Poll `probe` until it reports `satisfied` or the deadline expires
    ///
    /// Probes never overlap: a slow probe delays the next tick rather than
    /// running concurrently with it. A probe still in flight when the
    /// deadline fires is dropped.
    pub async fn run_until<T, F, Fut>(&self, mut probe: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProbeResult<T>>,
    {
        self.run_until_some(|| {
            let result = probe();
            async move {
                let result = result.await;
                result.satisfied.then_some(result.value)
            }
        })
        .await
    }

    /// Like [`PollSpec::run_until`] for probes that only yield a value once
    /// the condition holds
    pub async fn run_until_some<T, F, Fut>(&self, mut probe: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let deadline = self.resolved_timeout();
        let period = self.resolved_interval();
        let start = Instant::now();

        let first_tick = match self.first_probe {
            FirstProbe::AfterInterval => start + period,
            FirstProbe::Immediately => start,
        };
        let mut ticker = interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempts = 0u32;
        let polling = async {
            loop {
                ticker.tick().await;
                attempts += 1;

                if let Some(value) = probe().await {
                    return value;
                }

                debug!(
                    attempt = attempts,
                    elapsed = ?start.elapsed(),
                    "Condition not met, waiting for next tick"
                );
            }
        };

        match timeout(deadline, polling).await {
            Ok(value) => {
                debug!(attempts = attempts, elapsed = ?start.elapsed(), "Condition met");
                Ok(value)
            }
            Err(_) => Err(PollError::DeadlineExceeded {
                timeout: deadline,
                elapsed: start.elapsed(),
                attempts,
            }),
        }
    }
}

/// Shorthand for `spec.run_until(probe)`
pub async fn run_until<T, F, Fut>(spec: PollSpec, probe: F) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProbeResult<T>>,
{
    spec.run_until(probe).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_returns_value_from_satisfying_tick() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let start = Instant::now();

        let value = PollSpec::new(Duration::from_secs(2), Duration::from_millis(500))
            .run_until(move || {
                let c = counter_clone.clone();
                async move {
                    let tick = c.fetch_add(1, Ordering::SeqCst) + 1;
                    if tick >= 3 {
                        ProbeResult::ready(tick)
                    } else {
                        ProbeResult::pending(tick)
                    }
                }
            })
            .await
            .expect("should succeed on third tick");

        let elapsed = start.elapsed();
        assert_eq!(value, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(elapsed >= Duration::from_millis(1500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_some_returns_first_value() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let value = PollSpec::new(Duration::from_secs(2), Duration::from_millis(500))
            .immediately()
            .run_until_some(move || {
                let c = counter_clone.clone();
                async move {
                    let tick = c.fetch_add(1, Ordering::SeqCst) + 1;
                    (tick == 2).then_some("found")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "found");
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        let err = PollSpec::new(Duration::from_secs(1), Duration::from_millis(250))
            .run_until_some(|| async { None::<u32> })
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::DeadlineExceeded { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded_when_never_satisfied() {
        let start = Instant::now();

        let result = PollSpec::new(Duration::from_secs(2), Duration::from_millis(500))
            .run_until(|| async { ProbeResult::from(false) })
            .await;

        let elapsed = start.elapsed();
        match result {
            Err(PollError::DeadlineExceeded {
                timeout, attempts, ..
            }) => {
                assert_eq!(timeout, Duration::from_secs(2));
                assert!(attempts >= 3);
            }
            Ok(()) => panic!("expected DeadlineExceeded"),
        }
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_probe_waits_one_interval_by_default() {
        let start = Instant::now();

        PollSpec::new(Duration::from_secs(10), Duration::from_secs(1))
            .run_until(|| async { ProbeResult::from(true) })
            .await
            .expect("should succeed");

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1010), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediately_probes_at_call_time() {
        let start = Instant::now();

        PollSpec::new(Duration::from_secs(10), Duration::from_secs(1))
            .immediately()
            .run_until(|| async { ProbeResult::from(true) })
            .await
            .expect("should succeed");

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_durations_fall_back_to_defaults() {
        let spec = PollSpec::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(spec.resolved_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(spec.resolved_interval(), DEFAULT_INTERVAL);

        let start = Instant::now();
        let result = spec.run_until(|| async { ProbeResult::from(false) }).await;

        assert!(result.is_err());
        assert!(start.elapsed() >= DEFAULT_TIMEOUT);
        assert!(start.elapsed() < DEFAULT_TIMEOUT + DEFAULT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spec_is_reusable_across_runs() {
        let spec = PollSpec::new(Duration::from_secs(3), Duration::from_millis(100));

        let first = spec.run_until(|| async { ProbeResult::ready("ok") }).await;
        let second = spec.run_until(|| async { ProbeResult::ready("ok") }).await;

        assert_eq!(first, Ok("ok"));
        assert_eq!(second, Ok("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_run_does_not_affect_next_run() {
        let spec = PollSpec::new(Duration::from_millis(300), Duration::from_millis(100));

        let expired = spec.run_until(|| async { ProbeResult::from(false) }).await;
        assert!(expired.is_err());

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let result = spec
            .run_until(move || {
                let c = counter_clone.clone();
                async move { ProbeResult::from(c.fetch_add(1, Ordering::SeqCst) >= 1) }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_is_not_run_concurrently() {
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));
        let calls = Arc::new(AtomicU32::new(0));
        let (in_flight_c, max_seen_c, calls_c) = (in_flight.clone(), max_seen.clone(), calls.clone());

        let result = PollSpec::new(Duration::from_secs(5), Duration::from_millis(100))
            .run_until(move || {
                let (in_flight, max_seen, calls) =
                    (in_flight_c.clone(), max_seen_c.clone(), calls_c.clone());
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(350)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    ProbeResult::from(calls.fetch_add(1, Ordering::SeqCst) >= 2)
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_probe_releases_state() {
        let spec = PollSpec::new(Duration::from_secs(1), Duration::from_millis(100));

        let explode = true;
        let outcome = AssertUnwindSafe(spec.run_until(move || async move {
            if explode {
                panic!("probe blew up");
            }
            ProbeResult::from(true)
        }))
        .catch_unwind()
        .await;
        assert!(outcome.is_err());

        let result = spec.run_until(|| async { ProbeResult::from(true) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_function_matches_method() {
        let spec = PollSpec::default().with_interval(Duration::from_millis(10));
        let value = run_until(spec, || async { ProbeResult::ready(42) }).await;
        assert_eq!(value, Ok(42));
    }

    #[test]
    fn test_default_spec() {
        let spec = PollSpec::default();
        assert_eq!(spec.timeout, Duration::from_secs(60));
        assert_eq!(spec.interval, Duration::from_secs(1));
        assert_eq!(spec.first_probe, FirstProbe::AfterInterval);
    }

    #[test]
    fn test_error_message_mentions_timeout() {
        let err = PollError::DeadlineExceeded {
            timeout: Duration::from_secs(60),
            elapsed: Duration::from_secs(60),
            attempts: 59,
        };
        let msg = err.to_string();
        assert!(msg.contains("deadline exceeded"));
        assert!(msg.contains("60s"));
    }
}
