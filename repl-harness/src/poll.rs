//! The one place the harness waits.
//!
//! Every blocking step polls a probe through [`wait_until`] with a mandatory
//! deadline. A timeout reports what was awaited and the last value the probe
//! saw, so a hung scenario explains itself.

use std::future::Future;
use std::time::Duration;

use repl_core::PollSchedule;
use tokio::time::Instant;
use tracing::debug;

use crate::config::WaitConfig;
use crate::error::HarnessError;

/// Outcome of one probe.
#[derive(Debug)]
pub enum Probe<T> {
    /// Condition holds; stop waiting.
    Ready(T),
    /// Not yet; the string describes what was observed.
    Pending(String),
}

/// Timeout and polling intervals for a wait.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Upper bound for the whole wait.
    pub timeout: Duration,
    /// First interval between probes.
    pub initial_interval: Duration,
    /// Largest interval between probes.
    pub max_interval: Duration,
}

impl WaitPolicy {
    /// Build from configuration.
    pub fn from_config(config: &WaitConfig) -> Self {
        Self {
            timeout: config.timeout(),
            initial_interval: Duration::from_millis(config.poll_interval_ms),
            max_interval: Duration::from_millis(config.max_poll_interval_ms),
        }
    }

    /// Same intervals, different timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::from_config(&WaitConfig::default())
    }
}

/// Poll `probe` until it is ready or `policy.timeout` elapses.
///
/// Transient errors (see [`HarnessError::is_transient`]) count as a pending
/// observation. Any other error ends the wait immediately.
pub async fn wait_until<T, F, Fut>(
    what: &str,
    policy: &WaitPolicy,
    mut probe: F,
) -> Result<T, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, HarnessError>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut schedule = PollSchedule::new(policy.initial_interval, policy.max_interval);
    let mut last_observed = String::from("nothing yet");
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match probe().await {
            Ok(Probe::Ready(value)) => {
                debug!(what, attempts, "wait satisfied");
                return Ok(value);
            }
            Ok(Probe::Pending(observed)) => last_observed = observed,
            Err(e) if e.is_transient() => last_observed = e.to_string(),
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(HarnessError::Timeout {
                what: what.to_string(),
                waited: now - started,
                last_observed,
            });
        }
        let delay = schedule.next_delay().min(deadline - now);
        tokio::time::sleep(delay).await;
    }
}
