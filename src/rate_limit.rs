use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// In-memory sliding-window limiter keyed by bucket and client, e.g.
/// `login:<ip_hash>`. Limits are fixed at construction from config and
/// the limiter is handed to Rocket as managed state.
pub struct RateLimiter {
    entries: Mutex<HashMap<String, Vec<Instant>>>,
    max_attempts: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: u64, window: Duration) -> Self {
        RateLimiter {
            entries: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
            window,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Instant>>> {
        // A panic while holding the lock leaves only timestamps behind.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prune(&self, attempts: &mut Vec<Instant>, now: Instant) {
        attempts.retain(|t| now.duration_since(*t) < self.window);
    }

    /// Record an attempt and return true if it is allowed (under the limit).
    pub fn check_and_record(&self, key: &str) -> bool {
        let mut map = self.lock();
        let now = Instant::now();
        let attempts = map.entry(key.to_string()).or_default();
        self.prune(attempts, now);

        if (attempts.len() as u64) < self.max_attempts {
            attempts.push(now);
            true
        } else {
            false
        }
    }

    /// Remaining attempts without recording a new one.
    pub fn remaining(&self, key: &str) -> u64 {
        let mut map = self.lock();
        let now = Instant::now();
        match map.get_mut(key) {
            Some(attempts) => {
                self.prune(attempts, now);
                self.max_attempts.saturating_sub(attempts.len() as u64)
            }
            None => self.max_attempts,
        }
    }

    /// Forget a key, e.g. after a successful login.
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drop keys whose attempts have all left the window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut map = self.lock();
        map.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < self.window);
            !attempts.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_max_attempts() {
        let rl = RateLimiter::new(3, Duration::from_secs(60));
        assert!(rl.check_and_record("login:a"));
        assert!(rl.check_and_record("login:a"));
        assert_eq!(rl.remaining("login:a"), 1);
        assert!(rl.check_and_record("login:a"));
        assert!(!rl.check_and_record("login:a"));
        assert_eq!(rl.remaining("login:a"), 0);
        // other keys are independent
        assert!(rl.check_and_record("login:b"));
    }

    #[test]
    fn reset_clears_key() {
        let rl = RateLimiter::new(1, Duration::from_secs(60));
        assert!(rl.check_and_record("k"));
        assert!(!rl.check_and_record("k"));
        rl.reset("k");
        assert!(rl.check_and_record("k"));
    }

    #[test]
    fn window_expiry_and_cleanup() {
        let rl = RateLimiter::new(1, Duration::from_millis(20));
        assert!(rl.check_and_record("k"));
        assert!(!rl.check_and_record("k"));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(rl.remaining("k"), 1);
        rl.cleanup();
        assert_eq!(rl.tracked_keys(), 0);
        assert!(rl.check_and_record("k"));
    }
}
