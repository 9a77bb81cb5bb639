// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Reconnect back-off policies.
//!
//! The wire-level protocol only asks for two facts: "should I try again?"
//! and "how long should I wait before the next attempt?". The latter is
//! realized here as a plain `Duration` fed into `tokio::time::sleep` rather
//! than an abstract `Timer` type — there's nothing a `Timer` object would
//! buy over the `Duration` the caller immediately hands to `tokio::select!`
//! against the client's closed signal.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use crate::cfg::{config::ReconnectConfig, enums::ReconnectKind};

/// Stateful reconnect back-off: `retry()` decides whether another attempt
/// should be made, `backoff()` returns how long to wait before making it.
pub trait ReconnectPolicy: Send + Sync {
    fn retry(&self) -> bool;
    fn backoff(&self) -> Duration;
}

/// Never reconnects; the first failed attempt ends the loop.
#[derive(Debug, Default)]
pub struct Never;

impl ReconnectPolicy for Never {
    fn retry(&self) -> bool {
        false
    }

    fn backoff(&self) -> Duration {
        Duration::ZERO
    }
}

/// Retries at a fixed interval, up to `max_attempts` (0 = unbounded).
#[derive(Debug)]
pub struct Constant {
    delay: Duration,
    max_attempts: u32,
    attempts: AtomicU32,
}

impl Constant {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
            attempts: AtomicU32::new(0),
        }
    }
}

impl ReconnectPolicy for Constant {
    fn retry(&self) -> bool {
        let n = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_attempts == 0 || n <= self.max_attempts
    }

    fn backoff(&self) -> Duration {
        self.delay
    }
}

/// Doubles the delay on every attempt, capped at `max_delay`, up to
/// `max_attempts` (0 = unbounded).
#[derive(Debug)]
pub struct Exponential {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempts: AtomicU32,
}

impl Exponential {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            attempts: AtomicU32::new(0),
        }
    }
}

impl ReconnectPolicy for Exponential {
    fn retry(&self) -> bool {
        let n = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_attempts == 0 || n <= self.max_attempts
    }

    fn backoff(&self) -> Duration {
        let attempt = self.attempts.load(Ordering::Relaxed).max(1);
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Builds the policy named by a [`ReconnectConfig`].
pub fn build(config: &ReconnectConfig) -> std::sync::Arc<dyn ReconnectPolicy> {
    match config.kind {
        ReconnectKind::Never => std::sync::Arc::new(Never),
        ReconnectKind::Constant => {
            std::sync::Arc::new(Constant::new(config.initial_delay, config.max_attempts))
        },
        ReconnectKind::Exponential => std::sync::Arc::new(Exponential::new(
            config.initial_delay,
            config.max_delay,
            config.max_attempts,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_refuses_immediately() {
        let policy = Never;
        assert!(!policy.retry());
    }

    #[test]
    fn constant_backoff_does_not_grow() {
        let policy = Constant::new(Duration::from_millis(50), 0);
        assert!(policy.retry());
        assert_eq!(policy.backoff(), Duration::from_millis(50));
        assert!(policy.retry());
        assert_eq!(policy.backoff(), Duration::from_millis(50));
    }

    #[test]
    fn constant_stops_after_max_attempts() {
        let policy = Constant::new(Duration::from_millis(10), 2);
        assert!(policy.retry());
        assert!(policy.retry());
        assert!(!policy.retry());
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy =
            Exponential::new(Duration::from_millis(10), Duration::from_millis(35), 0);
        assert!(policy.retry());
        assert_eq!(policy.backoff(), Duration::from_millis(10));
        assert!(policy.retry());
        assert_eq!(policy.backoff(), Duration::from_millis(20));
        assert!(policy.retry());
        assert_eq!(policy.backoff(), Duration::from_millis(35));
    }
}
