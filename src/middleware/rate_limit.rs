//! Request throttles for the two abuse-prone inbound paths.
//!
//! `SearchGuard` caps external property searches globally and remembers
//! negative results so repeated misses don't burn upstream quota.
//! `PhoneThrottle` caps inbound SMS per phone number so a runaway sender
//! can't monopolize the per-phone pipeline or the LLM budget. Both are
//! per-process; at most one redundant upstream call can result from a
//! restart.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Guardrails for the external property-search path: a global per-minute
/// cap plus negative caches.
#[derive(Clone)]
pub struct SearchGuard {
    timestamps: Arc<Mutex<Vec<Instant>>>,
    negative: Arc<Mutex<HashMap<String, (Instant, Duration)>>>,
    max_per_minute: usize,
}

/// Addresses that resolved to "nothing found" are retried after 5 minutes.
pub const NOT_FOUND_TTL: Duration = Duration::from_secs(5 * 60);

/// Addresses that resolved to "not a commercial property" wait an hour.
pub const NOT_COMMERCIAL_TTL: Duration = Duration::from_secs(60 * 60);

impl SearchGuard {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(Vec::new())),
            negative: Arc::new(Mutex::new(HashMap::new())),
            max_per_minute,
        }
    }

    /// Try to acquire a search slot in the global window.
    pub fn try_acquire(&self) -> bool {
        let mut stamps = self.timestamps.lock();
        let now = Instant::now();
        stamps.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
        if stamps.len() >= self.max_per_minute {
            return false;
        }
        stamps.push(now);
        true
    }

    pub fn is_negative_cached(&self, key: &str) -> bool {
        let normalized = key.trim().to_lowercase();
        let cache = self.negative.lock();
        match cache.get(&normalized) {
            Some((at, ttl)) => at.elapsed() < *ttl,
            None => false,
        }
    }

    pub fn cache_negative(&self, key: &str, ttl: Duration) {
        let normalized = key.trim().to_lowercase();
        self.negative.lock().insert(normalized, (Instant::now(), ttl));
    }
}

/// Per-phone inbound SMS throttle. Each phone gets a rolling window of
/// message timestamps; a sender over the cap is refused before the
/// pipeline (and its LLM calls) ever runs.
#[derive(Clone)]
pub struct PhoneThrottle {
    history: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    max_messages: usize,
    window: Duration,
}

impl PhoneThrottle {
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            history: Arc::new(Mutex::new(HashMap::new())),
            max_messages,
            window,
        }
    }

    /// Record one inbound message; false means the phone is over its cap
    /// and the message should be refused.
    pub fn allow(&self, phone: &str) -> bool {
        let mut history = self.history.lock();
        let now = Instant::now();
        let stamps = history.entry(phone.to_string()).or_default();

        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        if stamps.len() >= self.max_messages {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Drop phones with no traffic in the current window; call from a
    /// background task.
    pub fn cleanup(&self) {
        let mut history = self.history.lock();
        let now = Instant::now();
        let window = self.window;
        history.retain(|_, stamps| {
            stamps.back().map(|t| now.duration_since(*t) < window).unwrap_or(false)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_guard_global_cap() {
        let guard = SearchGuard::new(3);
        assert!(guard.try_acquire());
        assert!(guard.try_acquire());
        assert!(guard.try_acquire());
        assert!(!guard.try_acquire());
    }

    #[test]
    fn test_negative_cache_ttls() {
        let guard = SearchGuard::new(10);
        assert!(!guard.is_negative_cached("123 Main St"));
        guard.cache_negative("123 Main St", NOT_FOUND_TTL);
        // Normalization: case and whitespace insensitive
        assert!(guard.is_negative_cached("  123 MAIN st "));

        guard.cache_negative("456 Oak Ave", Duration::from_millis(0));
        assert!(!guard.is_negative_cached("456 Oak Ave"));
    }

    #[test]
    fn test_phone_throttle_caps_per_phone() {
        let throttle = PhoneThrottle::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(throttle.allow("+12025550001"));
        }
        assert!(!throttle.allow("+12025550001"));
        // Other phones are unaffected
        assert!(throttle.allow("+12025550002"));
    }

    #[test]
    fn test_phone_throttle_window_expiry() {
        let throttle = PhoneThrottle::new(1, Duration::from_millis(0));
        // Zero-length window: every prior stamp expires immediately
        assert!(throttle.allow("+12025550001"));
        assert!(throttle.allow("+12025550001"));
    }

    #[test]
    fn test_phone_throttle_cleanup_drops_idle_phones() {
        let throttle = PhoneThrottle::new(5, Duration::from_millis(0));
        throttle.allow("+12025550001");
        throttle.cleanup();
        assert!(throttle.history.lock().is_empty());

        let active = PhoneThrottle::new(5, Duration::from_secs(60));
        active.allow("+12025550001");
        active.cleanup();
        assert_eq!(active.history.lock().len(), 1);
    }
}
