/// Reconnection state machine
///
/// Drives one subscription's lifecycle independently of the transport so
/// backoff behavior is testable without a network. Delay grows as
/// base * 2^(attempt-1); after `max_attempts` consecutive failures the
/// machine parks in `Error` and never schedules another attempt; the
/// caller must re-subscribe explicitly.
use serde::Serialize;
use tokio::time::Duration;

/// Externally visible connection state of one subscription
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    /// Waiting to retry; carries the attempt number being scheduled
    Backoff(u32),
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before the given attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

#[derive(Debug)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    attempt: u32,
    status: ConnectionStatus,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            status: ConnectionStatus::Idle,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
    }

    /// A connection was established; the attempt counter resets so a later
    /// disconnect starts backoff from the base delay again.
    pub fn connected(&mut self) {
        self.attempt = 0;
        self.status = ConnectionStatus::Connected;
    }

    /// The transport failed (connect error or terminal disconnect).
    /// Returns the delay to sleep before the next attempt, or `None` when
    /// the attempt budget is exhausted and the machine has parked in
    /// `Error`.
    pub fn failure(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt > self.policy.max_attempts {
            self.status = ConnectionStatus::Error;
            return None;
        }

        self.status = ConnectionStatus::Backoff(self.attempt);
        Some(self.policy.delay_for(self.attempt))
    }
}
