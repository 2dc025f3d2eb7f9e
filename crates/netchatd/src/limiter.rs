//! Per-user fixed-window rate limiting.
//!
//! One `RateLimiter` exists per registered session, owned by its registry
//! entry. The window is fixed, not sliding: the counter resets at window
//! boundaries rather than decaying continuously.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

/// Fixed-window admission counter.
///
/// A single session is expected to be the only caller of its limiter, but
/// the primitive is race-free regardless: admission uses a compare-and-swap
/// increment loop, so concurrent callers can never push `count` past the
/// limit within one window.
#[derive(Debug)]
pub struct RateLimiter {
    /// Start of the current window, epoch milliseconds
    window_start_ms: AtomicI64,

    /// Admissions in the current window
    count: AtomicU32,

    /// Admissions allowed per window
    limit: u32,

    /// Window length
    window: Duration,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` admissions per `window`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            window_start_ms: AtomicI64::new(now_ms()),
            count: AtomicU32::new(0),
            limit,
            window,
        }
    }

    /// Checks whether a request is admitted.
    ///
    /// If the window has elapsed, the window restarts and the request is
    /// admitted. Otherwise the counter is CAS-incremented while below the
    /// limit; `false` once the limit is reached. Rejection is not an error -
    /// the caller decides the user-facing message.
    pub fn admit(&self) -> bool {
        let now = now_ms();
        let started = self.window_start_ms.load(Ordering::Acquire);

        if now - started > self.window.as_millis() as i64 {
            self.window_start_ms.store(now, Ordering::Release);
            self.count.store(1, Ordering::Release);
            return true;
        }

        let mut current = self.count.load(Ordering::Acquire);
        while current < self.limit {
            match self.count.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }

        false
    }

    /// Admissions allowed per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Admissions counted in the current window.
    pub fn current_count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let results: Vec<bool> = (0..4).map(|_| limiter.admit()).collect();
        assert_eq!(results, vec![true, true, true, false]);
    }

    #[test]
    fn test_rejections_do_not_consume_budget() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.admit());
        assert!(limiter.admit());
        for _ in 0..10 {
            assert!(!limiter.admit());
        }
        assert_eq!(limiter.current_count(), 2);
    }

    #[test]
    fn test_window_reset_admits_again() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));
        assert!(limiter.admit());
        assert!(!limiter.admit());

        std::thread::sleep(Duration::from_millis(40));

        // Window elapsed: admitted again regardless of prior rejections
        assert!(limiter.admit());
        assert_eq!(limiter.current_count(), 1);
    }

    #[test]
    fn test_limit_accessor() {
        let limiter = RateLimiter::new(60, Duration::from_secs(60));
        assert_eq!(limiter.limit(), 60);
        assert_eq!(limiter.current_count(), 0);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_limit() {
        use std::sync::Arc;

        let limit = 50;
        let limiter = Arc::new(RateLimiter::new(limit, Duration::from_secs(60)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..20).filter(|_| limiter.admit()).count())
            })
            .collect();

        let admitted: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .sum();

        // 160 attempts against a budget of 50: exactly the budget is admitted
        assert_eq!(admitted, limit as usize);
        assert_eq!(limiter.current_count(), limit);
    }
}
