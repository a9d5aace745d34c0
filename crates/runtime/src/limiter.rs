//! Pacing of upstream calls.

use std::time::Duration;

use tokio::time::Instant;

/// Enforces a minimum gap between two processing units.
///
/// The first unit never waits; every later one waits until `interval` has
/// passed since the previous unit finished.
#[derive(Debug)]
pub struct Cooldown {
    interval: Duration,
    last_done: Option<Instant>,
}

impl Cooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_done: None,
        }
    }

    pub fn remaining(&self) -> Duration {
        match self.last_done {
            Some(done) => match done.checked_add(self.interval) {
                Some(ready) => ready.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            },
            None => Duration::ZERO,
        }
    }

    pub async fn wait(&mut self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
    }

    pub fn mark_done(&mut self) {
        self.last_done = Some(Instant::now());
    }
}

/// Exponential retry delay: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub const DEFAULT_MAX: Duration = Duration::from_secs(30);

    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }
}
