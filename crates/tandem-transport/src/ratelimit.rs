//! Per-IP sliding-window connection rate limiting.
//!
//! The limiter map is one of the three admitted pieces of process-global
//! mutable state (registry, invite-key index, this). It is guarded by a
//! plain `std::sync::Mutex` — no `await` ever happens under the lock.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Limits for the connection rate limiter.
///
/// These were magic numbers in the original deployment; they are
/// configuration here.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum connections one address may open per window.
    pub max_connections: usize,
    /// The sliding window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            window: Duration::from_secs(30),
        }
    }
}

/// Tracks recent connection attempts per source address.
pub struct ConnectionRateLimiter {
    config: RateLimiterConfig,
    /// Timestamps of accepted connections, newest last, pruned lazily.
    recent: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}

impl ConnectionRateLimiter {
    /// Creates a limiter with the given config.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Records a connection attempt from `ip` and returns whether it is
    /// allowed.
    ///
    /// The attempt is only recorded when allowed, so a flood of refused
    /// attempts doesn't extend its own penalty.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut recent = self.recent.lock().expect("rate limiter poisoned");
        let stamps = recent.entry(ip).or_default();
        stamps.retain(|t| now.duration_since(*t) < self.config.window);

        if stamps.len() >= self.config.max_connections {
            tracing::warn!(%ip, count = stamps.len(), "connection rate limit hit");
            return false;
        }
        stamps.push(now);
        true
    }

    /// Opportunistic cleanup, called on disconnect: prunes expired
    /// stamps for `ip` and drops the entry once empty.
    pub fn forget_stale(&self, ip: IpAddr) {
        let now = Instant::now();
        let mut recent = self.recent.lock().expect("rate limiter poisoned");
        if let Some(stamps) = recent.get_mut(&ip) {
            stamps.retain(|t| now.duration_since(*t) < self.config.window);
            if stamps.is_empty() {
                recent.remove(&ip);
            }
        }
    }

    /// Number of addresses currently tracked (for tests and metrics).
    pub fn tracked_addresses(&self) -> usize {
        self.recent.lock().expect("rate limiter poisoned").len()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Window behavior is tested with a zero-length window for "always
    //! expired" and the default 30 s window for "never expires during
    //! the test" — no sleeping against the clock.

    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    fn limiter(max: usize, window: Duration) -> ConnectionRateLimiter {
        ConnectionRateLimiter::new(RateLimiterConfig {
            max_connections: max,
            window,
        })
    }

    #[test]
    fn test_check_allows_up_to_limit() {
        let rl = limiter(10, Duration::from_secs(30));
        for _ in 0..10 {
            assert!(rl.check(ip(1)));
        }
    }

    #[test]
    fn test_check_refuses_one_past_limit() {
        let rl = limiter(10, Duration::from_secs(30));
        for _ in 0..10 {
            assert!(rl.check(ip(1)));
        }
        assert!(!rl.check(ip(1)), "11th connection in window must be refused");
    }

    #[test]
    fn test_check_tracks_addresses_independently() {
        let rl = limiter(1, Duration::from_secs(30));
        assert!(rl.check(ip(1)));
        assert!(!rl.check(ip(1)));
        // A different address is unaffected.
        assert!(rl.check(ip(2)));
    }

    #[test]
    fn test_expired_stamps_free_the_window() {
        // Zero-length window: every stamp is expired by the next check.
        let rl = limiter(1, Duration::ZERO);
        assert!(rl.check(ip(1)));
        assert!(rl.check(ip(1)));
        assert!(rl.check(ip(1)));
    }

    #[test]
    fn test_refused_attempts_are_not_recorded() {
        let rl = limiter(2, Duration::from_secs(30));
        assert!(rl.check(ip(1)));
        assert!(rl.check(ip(1)));
        // Refused attempts shouldn't pile onto the window...
        for _ in 0..5 {
            assert!(!rl.check(ip(1)));
        }
        // ...so the tracked stamp count stays at the limit.
        let tracked = rl.recent.lock().unwrap().get(&ip(1)).unwrap().len();
        assert_eq!(tracked, 2);
    }

    #[test]
    fn test_forget_stale_drops_empty_entries() {
        let rl = limiter(5, Duration::ZERO);
        assert!(rl.check(ip(1)));
        assert_eq!(rl.tracked_addresses(), 1);

        // Window is zero, so the stamp is stale immediately.
        rl.forget_stale(ip(1));
        assert_eq!(rl.tracked_addresses(), 0);
    }

    #[test]
    fn test_forget_stale_keeps_live_entries() {
        let rl = limiter(5, Duration::from_secs(30));
        assert!(rl.check(ip(1)));
        rl.forget_stale(ip(1));
        // Stamp is still inside the window — entry stays.
        assert_eq!(rl.tracked_addresses(), 1);
    }
}
