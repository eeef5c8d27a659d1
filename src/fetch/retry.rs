//! Bounded exponential backoff as an explicit state machine.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call. At least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempt: 1,
            next_delay: self.initial_delay.min(self.max_delay),
        }
    }

    /// The full delay schedule this policy can produce.
    pub fn delays(&self) -> Vec<Duration> {
        let mut state = self.start();
        let mut delays = Vec::new();
        while let RetryDecision::RetryAfter(d) = state.on_failure(true) {
            delays.push(d);
        }
        delays
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Progress of one retried operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    next_delay: Duration,
}

impl RetryState {
    /// The attempt currently being made, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records a failed attempt and decides what happens next.
    pub fn on_failure(&mut self, transient: bool) -> RetryDecision {
        if !transient || self.attempt >= self.policy.max_attempts.max(1) {
            return RetryDecision::GiveUp;
        }
        let delay = self.next_delay;
        self.attempt += 1;
        self.next_delay = delay
            .mul_f64(self.policy.multiplier.max(1.0))
            .min(self.policy.max_delay);
        RetryDecision::RetryAfter(delay)
    }
}
