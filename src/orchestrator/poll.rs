//! Bounded status polling

use crate::error::{Error, Result};
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff and deadlines for instance status polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    /// Deadline for the instance to report `Stopped`
    pub stop_deadline_secs: u64,
    /// Deadline for the instance to report `Running` after recovery
    pub start_deadline_secs: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 2_000,
            max_interval_ms: 30_000,
            multiplier: 1.5,
            stop_deadline_secs: 15 * 60,
            start_deadline_secs: 30 * 60,
        }
    }
}

impl PollPolicy {
    pub fn stop_deadline(&self) -> Duration {
        Duration::from_secs(self.stop_deadline_secs)
    }

    pub fn start_deadline(&self) -> Duration {
        Duration::from_secs(self.start_deadline_secs)
    }
}

enum Attempt {
    /// Probe answered, condition not met yet
    Pending(String),
    /// Probe failed in a way worth retrying
    Retry(Error),
    Failed(Error),
}

/// Call `probe` until `done` accepts its answer or `deadline` passes.
///
/// Transient probe errors are retried like a pending answer; any other
/// error ends the wait immediately. Running out of time is
/// [`Error::Timeout`].
pub async fn wait_until<T, F, Fut, D>(
    policy: &PollPolicy,
    deadline: Duration,
    what: &str,
    mut probe: F,
    done: D,
) -> Result<T>
where
    T: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    D: Fn(&T) -> bool,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(policy.initial_interval_ms))
        .with_max_interval(Duration::from_millis(policy.max_interval_ms))
        .with_multiplier(policy.multiplier)
        .with_max_elapsed_time(Some(deadline))
        .build();

    let done = &done;
    let outcome = backoff::future::retry(backoff, || {
        let answer = probe();
        async move {
            match answer.await {
                Ok(value) if done(&value) => Ok(value),
                Ok(value) => {
                    debug!("Waiting for {}: currently {}", what, value);
                    Err(backoff::Error::transient(Attempt::Pending(value.to_string())))
                }
                Err(e) if e.is_transient() => {
                    debug!("Waiting for {}: {}", what, e);
                    Err(backoff::Error::transient(Attempt::Retry(e)))
                }
                Err(e) => Err(backoff::Error::permanent(Attempt::Failed(e))),
            }
        }
    })
    .await;

    match outcome {
        Ok(value) => Ok(value),
        Err(Attempt::Failed(e)) => Err(e),
        Err(Attempt::Pending(last)) => Err(Error::Timeout {
            what: format!("{} (last seen: {})", what, last),
            waited: deadline,
        }),
        Err(Attempt::Retry(last)) => Err(Error::Timeout {
            what: format!("{} (last error: {})", what, last),
            waited: deadline,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    fn quick() -> PollPolicy {
        PollPolicy {
            initial_interval_ms: 1,
            max_interval_ms: 5,
            multiplier: 2.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_waits_for_condition() {
        let answers = Mutex::new(vec![3u32, 2, 1]);
        let result = wait_until(
            &quick(),
            Duration::from_secs(5),
            "countdown",
            || {
                let next = answers.lock().pop().unwrap_or(3);
                async move { Ok(next) }
            },
            |value| *value == 3,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert!(answers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_is_a_timeout() {
        let result = wait_until(
            &quick(),
            Duration::from_millis(30),
            "instance stop",
            || async { Ok("Running") },
            |status| *status == "Stopped",
        )
        .await;

        assert_matches!(result, Err(Error::Timeout { what, .. }) if what.contains("Running"));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = Mutex::new(0u32);
        let result = wait_until(
            &quick(),
            Duration::from_secs(5),
            "status",
            || {
                let attempt = {
                    let mut calls = calls.lock();
                    *calls += 1;
                    *calls
                };
                async move {
                    if attempt < 3 {
                        Err(Error::remote("hana01", "connection reset"))
                    } else {
                        Ok("Stopped")
                    }
                }
            },
            |status| *status == "Stopped",
        )
        .await;

        assert_eq!(result.unwrap(), "Stopped");
        assert_eq!(*calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_waiting() {
        let calls = Mutex::new(0u32);
        let result: Result<&str> = wait_until(
            &quick(),
            Duration::from_secs(5),
            "status",
            || {
                *calls.lock() += 1;
                async { Err(Error::Configuration("bad instance number".into())) }
            },
            |_| true,
        )
        .await;

        assert_matches!(result, Err(Error::Configuration(_)));
        assert_eq!(*calls.lock(), 1);
    }
}
