use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::state::SharedState;

/// Per-IP-per-form submission rate limiter using a fixed window.
pub struct SubmissionRateLimiter {
    /// (xform_id, ip) -> (count, window_start)
    entries: DashMap<(i64, IpAddr), (u32, Instant)>,
}

impl Default for SubmissionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionRateLimiter {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Check if request is allowed. Returns Ok(()) or Err with retry-after seconds.
    pub fn check(&self, xform_id: i64, ip: IpAddr, limit: u32, window_secs: u64) -> Result<(), u64> {
        let window = Duration::from_secs(window_secs);
        let now = Instant::now();

        let mut entry = self.entries.entry((xform_id, ip)).or_insert((0, now));
        let (count, start) = entry.value_mut();

        if now.duration_since(*start) > window {
            *count = 1;
            *start = now;
            return Ok(());
        }

        if *count >= limit {
            let elapsed = now.duration_since(*start).as_secs();
            return Err(window_secs.saturating_sub(elapsed).max(1));
        }

        *count += 1;
        Ok(())
    }

    /// Remove stale entries older than the given duration.
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.entries.retain(|_, (_, start)| now.duration_since(*start) < max_age);
    }
}

const LOGIN_WINDOW: Duration = Duration::from_secs(15 * 60);
const LOGIN_MAX_FAILURES: u32 = 5;

/// Per-username login brute force limiter.
pub struct LoginRateLimiter {
    /// username -> (failed_count, window_start)
    entries: DashMap<String, (u32, Instant)>,
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Check if a login attempt is allowed. Does NOT increment the counter;
    /// call `record_failure()` on a bad password.
    pub fn check(&self, username: &str) -> Result<(), u64> {
        let now = Instant::now();

        let Some(entry) = self.entries.get(&username.to_lowercase()) else {
            return Ok(());
        };

        let (count, start) = entry.value();

        if now.duration_since(*start) > LOGIN_WINDOW {
            return Ok(());
        }

        if *count >= LOGIN_MAX_FAILURES {
            let elapsed = now.duration_since(*start).as_secs();
            return Err(LOGIN_WINDOW.as_secs().saturating_sub(elapsed));
        }

        Ok(())
    }

    pub fn record_failure(&self, username: &str) {
        let now = Instant::now();

        let mut entry = self.entries.entry(username.to_lowercase()).or_insert((0, now));
        let (count, start) = entry.value_mut();

        if now.duration_since(*start) > LOGIN_WINDOW {
            *count = 1;
            *start = now;
        } else {
            *count += 1;
        }
    }

    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.entries.retain(|_, (_, start)| now.duration_since(*start) < max_age);
    }
}

/// Periodically evict expired limiter entries.
pub fn spawn_cleanup(state: SharedState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let window = Duration::from_secs(state.config.submission_rate_window_secs);
            state.submission_limiter.cleanup(window);
            state.login_limiter.cleanup(LOGIN_WINDOW);
            tracing::trace!("Rate limiter entries cleaned up");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submissions_limited_per_form_and_ip() {
        let limiter = SubmissionRateLimiter::new();
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        assert!(limiter.check(1, ip, 2, 60).is_ok());
        assert!(limiter.check(1, ip, 2, 60).is_ok());
        let retry = limiter.check(1, ip, 2, 60).unwrap_err();
        assert!(retry >= 1 && retry <= 60);

        // Other forms and other clients have their own budget
        assert!(limiter.check(2, ip, 2, 60).is_ok());
        assert!(limiter.check(1, "192.0.2.2".parse().unwrap(), 2, 60).is_ok());
    }

    #[test]
    fn login_locks_after_repeated_failures() {
        let limiter = LoginRateLimiter::new();
        for _ in 0..LOGIN_MAX_FAILURES {
            assert!(limiter.check("Bob").is_ok());
            limiter.record_failure("bob");
        }
        assert!(limiter.check("BOB").is_err());
        assert!(limiter.check("alice").is_ok());
    }

    #[test]
    fn cleanup_drops_old_entries() {
        let limiter = SubmissionRateLimiter::new();
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(limiter.check(1, ip, 1, 60).is_ok());
        assert!(limiter.check(1, ip, 1, 60).is_err());
        limiter.cleanup(Duration::ZERO);
        assert!(limiter.check(1, ip, 1, 60).is_ok());
    }
}
