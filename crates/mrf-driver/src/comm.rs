//! Communication state machine
//!
//! Each channel's [`CommStatus`] lives in a single atomic word. Only the
//! worker that owns the channel writes it; everyone else loads it.
//!
//! Allowed transitions:
//!
//! ```text
//! DISCONNECTED -> CONNECTING          connect attempt starts
//! CONNECTING   -> CONNECTED           connect succeeded
//! CONNECTING   -> ERROR               timeout / refused
//! CONNECTED    -> ERROR               read/write failure, framing violation
//! ERROR        -> CONNECTING          retry after backoff
//! CONNECTED | ERROR -> DISCONNECTED   shutdown
//! ```

use crate::clock;
use mrf_protocol::{Channel, CommStatus};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Rejected communication transition; the status is left unchanged
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{channel} link: transition {from} -> {to} is not allowed")]
pub struct CommTransitionError {
    pub channel: Channel,
    pub from: CommStatus,
    pub to: CommStatus,
}

/// Whether `from -> to` is in the transition table
pub fn is_allowed(from: CommStatus, to: CommStatus) -> bool {
    use CommStatus::*;
    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Error)
            | (Connected, Error)
            | (Error, Connecting)
            | (Connected, Disconnected)
            | (Error, Disconnected)
    )
}

/// Atomic per-channel status
#[derive(Debug)]
pub struct CommChannel {
    channel: Channel,
    status: AtomicU8,
    /// Monotonic micros of the last transition
    since_us: AtomicU64,
}

impl CommChannel {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            status: AtomicU8::new(CommStatus::Disconnected.as_u8()),
            since_us: AtomicU64::new(clock::monotonic_micros()),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn status(&self) -> CommStatus {
        // Only valid discriminants are ever stored
        CommStatus::try_from(self.status.load(Ordering::Acquire))
            .unwrap_or(CommStatus::Error)
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Time spent in the current status
    pub fn time_in_status(&self) -> Duration {
        let since = self.since_us.load(Ordering::Relaxed);
        Duration::from_micros(clock::monotonic_micros().saturating_sub(since))
    }

    /// Move to `to` if the table allows it
    ///
    /// # Returns
    /// The previous status, or an error if the transition is not allowed
    /// (the status is unchanged in that case).
    pub(crate) fn transition(&self, to: CommStatus) -> Result<CommStatus, CommTransitionError> {
        let from = self.status();
        if !is_allowed(from, to) {
            return Err(CommTransitionError {
                channel: self.channel,
                from,
                to,
            });
        }
        // compare_exchange guards against a second writer sneaking in
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map_err(|actual| CommTransitionError {
                channel: self.channel,
                from: CommStatus::try_from(actual).unwrap_or(CommStatus::Error),
                to,
            })?;
        self.since_us
            .store(clock::monotonic_micros(), Ordering::Relaxed);
        Ok(from)
    }
}

/// Exponential reconnect backoff
///
/// The delay is `base * 2^failures`, capped at `max`. The failure counter is
/// cleared once a connection has stayed up for `reset_after`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    reset_after: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, reset_after: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            reset_after,
            failures: 0,
        }
    }

    /// Delay before the next attempt; counts one more consecutive failure
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.max);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Report how long the last connection stayed up
    pub fn record_connected(&mut self, uptime: Duration) {
        if uptime >= self.reset_after {
            self.failures = 0;
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
