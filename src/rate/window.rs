//! Fixed-window request limiter.
//!
//! A window is identified by `floor(now / window_secs)`; the counter resets
//! when the window rolls over. A burst straddling a window boundary can admit
//! up to twice the limit across the boundary; that is accepted fixed-window
//! error, kept deliberately over token-bucket smoothing.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::rate::policy::{RateClass, RatePolicy};

/// Outcome of one admission check, with enough detail for the route layer to
/// emit `X-RateLimit-*` and `Retry-After` headers.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

#[derive(Debug)]
struct Window {
    window_start: i64,
    count: u32,
}

/// Counts requests per `(class, identity)` in aligned windows.
pub struct FixedWindowLimiter {
    windows: DashMap<(RateClass, String), Window>,
}

impl FixedWindowLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    pub fn allow(&self, class: RateClass, identity: &str) -> RateDecision {
        self.allow_at(class, identity, Utc::now())
    }

    /// Admission check at an explicit instant. The entry guard makes the
    /// read-increment atomic per key; two concurrent requests cannot both
    /// slip past the last slot.
    pub fn allow_at(&self, class: RateClass, identity: &str, now: DateTime<Utc>) -> RateDecision {
        let policy = class.policy();
        let now_secs = now.timestamp();
        let window_start = aligned_window_start(now_secs, policy.window_secs);

        let mut entry = self
            .windows
            .entry((class, identity.to_string()))
            .or_insert(Window {
                window_start,
                count: 0,
            });

        if entry.window_start != window_start {
            entry.window_start = window_start;
            entry.count = 0;
        }

        let retry_after_secs =
            (entry.window_start + policy.window_secs as i64 - now_secs).max(0) as u64;

        if entry.count >= policy.max {
            log::debug!(
                "rate limit hit for {} in class {} ({} / {})",
                identity,
                class.as_str(),
                entry.count,
                policy.max
            );
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs,
            };
        }

        entry.count += 1;
        RateDecision {
            allowed: true,
            remaining: policy.max - entry.count,
            retry_after_secs,
        }
    }

    /// Drop windows that have already rolled over. Run periodically; the
    /// limiter stays correct without it, this only bounds memory.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let now_secs = now.timestamp();
        let before = self.windows.len();
        self.windows.retain(|(class, _), window| {
            window.window_start + class.policy().window_secs as i64 > now_secs
        });
        before - self.windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn aligned_window_start(now_secs: i64, window_secs: u64) -> i64 {
    let window = window_secs as i64;
    (now_secs / window) * window
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn admits_at_most_the_limit_within_one_window() {
        let limiter = FixedWindowLimiter::new();
        let now = at(1_700_000_000);

        for i in 0..20 {
            let decision = limiter.allow_at(RateClass::Ai, "user@example.com", now);
            assert!(decision.allowed, "request {} should pass", i);
            assert_eq!(decision.remaining, 19 - i);
        }

        let denied = limiter.allow_at(RateClass::Ai, "user@example.com", now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_secs > 0);
    }

    #[test]
    fn window_rollover_resets_the_counter() {
        let limiter = FixedWindowLimiter::new();
        // Aligned to the minute for the Ai class (60s windows).
        let start = at(1_700_000_040 / 60 * 60);

        for _ in 0..20 {
            assert!(limiter.allow_at(RateClass::Ai, "u", start).allowed);
        }
        assert!(!limiter.allow_at(RateClass::Ai, "u", start).allowed);

        let next_window = start + chrono::Duration::seconds(60);
        assert!(limiter.allow_at(RateClass::Ai, "u", next_window).allowed);
    }

    #[test]
    fn identities_and_classes_are_independent() {
        let limiter = FixedWindowLimiter::new();
        let now = at(1_700_000_000);

        for _ in 0..20 {
            assert!(limiter.allow_at(RateClass::Ai, "a", now).allowed);
        }
        assert!(!limiter.allow_at(RateClass::Ai, "a", now).allowed);
        assert!(limiter.allow_at(RateClass::Ai, "b", now).allowed);
        assert!(limiter.allow_at(RateClass::Default, "a", now).allowed);
    }

    #[test]
    fn purge_drops_only_rolled_over_windows() {
        let limiter = FixedWindowLimiter::new();
        let now = at(1_700_000_000);

        limiter.allow_at(RateClass::Ai, "a", now);
        limiter.allow_at(RateClass::Email, "a", now);
        assert_eq!(limiter.tracked_keys(), 2);

        // 10 minutes later the 60s Ai window is stale, the 1h Email window
        // is not.
        let purged = limiter.purge_expired(now + chrono::Duration::seconds(600));
        assert_eq!(purged, 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn concurrent_requests_never_exceed_the_limit() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        let limiter = Arc::new(FixedWindowLimiter::new());
        let now = at(1_700_000_000);
        let admitted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        if limiter.allow_at(RateClass::Ai, "u", now).allowed {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 20);
    }
}
