//! Retry utilities with exponential backoff

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 2000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.initial_delay_ms as f64
            * self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(delay_ms as u64).min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Retry state for one failing operation.
///
/// Only transient I/O errors are retried; the attempt counter includes the
/// first try, so `max_attempts = 3` allows two retries.
#[derive(Debug)]
pub struct Backoff<'a> {
    config: &'a RetryConfig,
    attempt: u32,
}

impl<'a> Backoff<'a> {
    pub fn new(config: &'a RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` to give up.
    pub fn next_delay(&mut self, error: &FrameError) -> Option<Duration> {
        if !error.is_transient() {
            return None;
        }
        self.attempt += 1;
        if self.attempt >= self.config.max_attempts.max(1) {
            return None;
        }
        let delay = self.config.delay_for_attempt(self.attempt);
        tracing::warn!(
            "Read failed (attempt {}/{}), retrying in {:?}: {}",
            self.attempt,
            self.config.max_attempts,
            delay,
            error
        );
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
