// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::time::Duration;

use tracing::warn;

/// Bounded retry with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    /// Extra attempts after the first one.
    pub retries: usize,
    pub base_delay: Duration,
}

impl Backoff {
    pub const NONE: Backoff = Backoff {
        retries: 0,
        base_delay: Duration::ZERO,
    };

    pub fn new(retries: usize, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
        }
    }

    /// Delay before attempt number `attempt` (zero-based, so attempt 1 is the first retry).
    pub fn delay_before(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl((attempt - 1) as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, or attempts run out. `op`
    /// receives the zero-based attempt number.
    pub fn run<T, E, F, R>(&self, description: &str, mut op: F, mut should_retry: R) -> Result<T, E>
    where
        E: Display,
        F: FnMut(usize) -> Result<T, E>,
        R: FnMut(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            std::thread::sleep(self.delay_before(attempt));
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries && should_retry(&e) => {
                    warn!(%description, attempt, error = %e, "Attempt failed, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500))
    }
}
