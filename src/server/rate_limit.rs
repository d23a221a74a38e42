//! Per-user request throttling.
//!
//! Fixed window, fixed quota: each user gets `max_requests` per
//! `window_secs`; requests beyond the quota are rejected outright with a
//! retryable error, never queued. Windows live in a `DashMap` so
//! concurrent requests never contend on a global lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::chat::core::config::RateLimitConfig;
use crate::chat::core::errors::ChatError;
use crate::chat::core::ids::UserId;

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by user.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<UserId, Window>,
}

impl RateLimiter {
    /// Create a limiter for the given quota.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Admit or reject one request for a user.
    ///
    /// # Errors
    /// Returns `ChatError::RateLimited` when the user's window quota is
    /// exhausted.
    pub fn check(&self, user_id: UserId) -> Result<(), ChatError> {
        self.check_at(user_id, Instant::now())
    }

    fn check_at(&self, user_id: UserId, now: Instant) -> Result<(), ChatError> {
        let window_len = Duration::from_secs(self.config.window_secs);
        let mut entry = self.windows.entry(user_id).or_insert_with(|| Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= window_len {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.config.max_requests {
            return Err(ChatError::RateLimited);
        }
        entry.count += 1;
        Ok(())
    }
}
