//! Per-queue retry policies.

use std::time::Duration;

/// Fixed backoff sequence applied to a queue's deliveries.
///
/// An exhausted sequence routes the message to the dead-letter path
/// rather than blocking the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Creates a policy from an explicit backoff sequence.
    pub fn with_delays(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// No retries: a single delivery attempt.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    /// 1s/5s/15s — for commands expected to succeed quickly.
    pub fn fast_command() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
            ],
        }
    }

    /// 1s/5s/15s/30s — for the first step of a saga, which may race the
    /// creation of downstream state.
    pub fn saga_start() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(30),
            ],
        }
    }

    /// Total number of delivery attempts (first attempt plus retries).
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Returns the delay before the given retry (1-based), or None once
    /// the sequence is exhausted.
    pub fn delay_before_retry(&self, retry: usize) -> Option<Duration> {
        if retry == 0 {
            return None;
        }
        self.delays.get(retry - 1).copied()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fast_command()
    }
}
