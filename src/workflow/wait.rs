//! Poll pacing and the run deadline.
//!
//! Every suspension point in a run goes through [`Deadline::guard`], so a
//! run never outlives its global timeout regardless of how long an individual
//! wait or service call would take.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

/// Delay strategy between poll cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitPolicy {
    /// Same delay before every poll.
    Fixed { interval: Duration },
    /// `base * 2^(cycle - 1)`, never more than `cap`.
    Exponential { base: Duration, cap: Duration },
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Fixed {
            interval: Duration::from_secs(30),
        }
    }
}

impl WaitPolicy {
    /// Delay before the poll following wait cycle `cycle` (1-based).
    pub fn delay_for_cycle(&self, cycle: u32) -> Duration {
        match *self {
            WaitPolicy::Fixed { interval } => interval,
            WaitPolicy::Exponential { base, cap } => {
                let exp = cycle.saturating_sub(1).min(31);
                base.saturating_mul(1u32 << exp).min(cap)
            }
        }
    }
}

/// Why a guarded operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interrupt {
    /// The global deadline elapsed.
    Timeout,
    /// The run was cancelled from outside.
    Cancelled,
}

/// Absolute end time of a run plus its cancellation signal.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancel: CancellationToken,
}

/// Roughly thirty years, used when a timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

impl Deadline {
    /// A timeout too large for the clock saturates to a far-future instant.
    pub fn after(timeout: Duration, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        let at = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
        Self { at, cancel }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Checked at state boundaries, before starting any new work.
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            Err(Interrupt::Cancelled)
        } else if self.is_expired() {
            Err(Interrupt::Timeout)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless the deadline passes or the run is cancelled first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = sleep_until(self.at) => Err(Interrupt::Timeout),
            out = fut => Ok(out),
        }
    }
}

/// Sleep for wait cycle `cycle`, returning the delay actually served.
pub async fn wait(policy: &WaitPolicy, cycle: u32, deadline: &Deadline) -> Result<Duration, Interrupt> {
    let delay = policy.delay_for_cycle(cycle);
    deadline.guard(sleep(delay)).await?;
    Ok(delay)
}
