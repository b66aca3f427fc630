//! # Rate Limiter (§4.7)
//!
//! Sliding-window rate limiting keyed by a SHA-256 hash of the caller's
//! identifier — an installed plugin, a registry client, or a query caller,
//! depending on what the host process chooses to limit. An instance is
//! explicitly constructed and injected rather than reached through a
//! global, matching the no-ambient-singleton stance in §9 (the teacher's
//! `auth.rs` uses a `OnceLock`-backed global; this is deliberately not
//! carried over).

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

fn hash_identifier(identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sliding-window policy (§4.7 defaults: 5 attempts / 15min window / 1h
/// block / 5min cleanup interval).
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RateLimiterPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            block_duration: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

struct Record {
    attempts: Vec<Instant>,
    blocked_until: Option<Instant>,
}

/// Outcome of [`RateLimiter::allow_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed { remaining: u32 },
    Denied { retry_after_secs: u64 },
}

/// A sliding-window limiter over SHA-256-hashed identifiers, with an
/// independent block duration entered once the window fills (a block does
/// not simply reset the window — it holds the identifier denied for
/// `block_duration` regardless of how the window empties in the meantime).
pub struct RateLimiter {
    policy: RateLimiterPolicy,
    records: DashMap<String, Record>,
}

impl RateLimiter {
    pub fn new(policy: RateLimiterPolicy) -> Self {
        Self {
            policy,
            records: DashMap::new(),
        }
    }

    /// Run the four-step sliding-window algorithm (§4.7) for `identifier`.
    pub fn allow_request(&self, identifier: &str) -> RateLimitOutcome {
        let key = hash_identifier(identifier);
        let now = Instant::now();
        let mut entry = self.records.entry(key).or_insert_with(|| Record {
            attempts: Vec::new(),
            blocked_until: None,
        });

        if let Some(blocked_until) = entry.blocked_until {
            if blocked_until > now {
                let retry_after = blocked_until.duration_since(now).as_secs().max(1);
                return RateLimitOutcome::Denied { retry_after_secs: retry_after };
            }
            entry.blocked_until = None;
        }

        entry.attempts.retain(|t| now.duration_since(*t) < self.policy.window);

        if entry.attempts.len() as u32 >= self.policy.max_attempts {
            entry.blocked_until = Some(now + self.policy.block_duration);
            let retry_after = self.policy.block_duration.as_secs().max(1);
            return RateLimitOutcome::Denied { retry_after_secs: retry_after };
        }

        entry.attempts.push(now);
        let remaining = self.policy.max_attempts - entry.attempts.len() as u32;
        RateLimitOutcome::Allowed { remaining }
    }

    /// Remove `identifier`'s record entirely, as if it had never made a
    /// request.
    pub fn reset(&self, identifier: &str) {
        self.records.remove(&hash_identifier(identifier));
    }

    /// Drop records whose block has expired and whose window has emptied —
    /// a record still holding recent attempts or an active block survives.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.policy.window;
        self.records.retain(|_, record| {
            let block_expired = record.blocked_until.map(|b| b <= now).unwrap_or(true);
            let window_empty = record.attempts.iter().all(|t| now.duration_since(*t) >= window);
            !(block_expired && window_empty)
        });
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.policy.cleanup_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_under_the_limit_reporting_remaining() {
        let limiter = RateLimiter::new(RateLimiterPolicy {
            max_attempts: 3,
            window: Duration::from_secs(1),
            block_duration: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(60),
        });
        assert_eq!(limiter.allow_request("caller"), RateLimitOutcome::Allowed { remaining: 2 });
        assert_eq!(limiter.allow_request("caller"), RateLimitOutcome::Allowed { remaining: 1 });
        assert_eq!(limiter.allow_request("caller"), RateLimitOutcome::Allowed { remaining: 0 });
    }

    #[test]
    fn fourth_call_within_window_is_blocked_with_retry_after() {
        let limiter = RateLimiter::new(RateLimiterPolicy {
            max_attempts: 3,
            window: Duration::from_secs(1),
            block_duration: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(60),
        });
        for _ in 0..3 {
            limiter.allow_request("caller");
        }
        match limiter.allow_request("caller") {
            RateLimitOutcome::Denied { retry_after_secs } => assert!(retry_after_secs <= 2 && retry_after_secs >= 1),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn reset_clears_block_and_window() {
        let limiter = RateLimiter::new(RateLimiterPolicy {
            max_attempts: 1,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
        });
        limiter.allow_request("caller");
        assert!(matches!(limiter.allow_request("caller"), RateLimitOutcome::Denied { .. }));
        limiter.reset("caller");
        assert_eq!(limiter.allow_request("caller"), RateLimitOutcome::Allowed { remaining: 0 });
    }

    #[test]
    fn distinct_identifiers_are_tracked_independently() {
        let limiter = RateLimiter::new(RateLimiterPolicy {
            max_attempts: 1,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
        });
        assert_eq!(limiter.allow_request("a"), RateLimitOutcome::Allowed { remaining: 0 });
        assert_eq!(limiter.allow_request("b"), RateLimitOutcome::Allowed { remaining: 0 });
    }

    #[test]
    fn identifiers_are_hashed_not_stored_in_plaintext() {
        let limiter = RateLimiter::new(RateLimiterPolicy::default());
        limiter.allow_request("sensitive-user-email@example.com");
        assert!(!limiter.records.contains_key("sensitive-user-email@example.com"));
        assert!(limiter.records.contains_key(&hash_identifier("sensitive-user-email@example.com")));
    }

    #[test]
    fn window_slides_so_old_attempts_free_up_capacity() {
        let limiter = RateLimiter::new(RateLimiterPolicy {
            max_attempts: 1,
            window: Duration::from_millis(20),
            block_duration: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
        });
        limiter.allow_request("caller");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(limiter.allow_request("caller"), RateLimitOutcome::Allowed { remaining: 0 });
    }

    #[test]
    fn cleanup_removes_only_expired_and_empty_records() {
        let limiter = RateLimiter::new(RateLimiterPolicy {
            max_attempts: 1,
            window: Duration::from_millis(5),
            block_duration: Duration::from_millis(5),
            cleanup_interval: Duration::from_secs(60),
        });
        limiter.allow_request("stale");
        std::thread::sleep(Duration::from_millis(20));
        limiter.cleanup();
        assert!(!limiter.records.contains_key(&hash_identifier("stale")));
    }

    #[test]
    fn cleanup_keeps_records_still_within_window() {
        let limiter = RateLimiter::new(RateLimiterPolicy {
            max_attempts: 5,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
        });
        limiter.allow_request("fresh");
        limiter.cleanup();
        assert!(limiter.records.contains_key(&hash_identifier("fresh")));
    }
}
